use std::path::{Path, PathBuf};

use anyhow::Context;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{sections, Entry, ReportRenderer, SectionKind};
use crate::error::ExportError;
use crate::report::AuditReport;

const REPORT_SUFFIX: &str = "-audit-report.pdf";
const TITLE: &str = "Smart Contract Audit Report";

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const CODE_INDENT: f32 = 18.0;

/// Visual role of a laid-out line; fixes font, size and leading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Title,
    Subtitle,
    Heading,
    Body,
    Code,
}

impl TextStyle {
    fn font(self) -> &'static str {
        match self {
            Self::Title | Self::Heading => "F2",
            Self::Subtitle | Self::Body => "F1",
            Self::Code => "F3",
        }
    }

    fn size(self) -> f32 {
        match self {
            Self::Title => 20.0,
            Self::Heading => 14.0,
            Self::Subtitle => 10.0,
            Self::Body => 11.0,
            Self::Code => 9.0,
        }
    }

    fn leading(self) -> f32 {
        match self {
            Self::Title => 30.0,
            Self::Heading => 24.0,
            Self::Subtitle => 14.0,
            Self::Body => 15.0,
            Self::Code => 12.0,
        }
    }

    /// Characters per line for the built-in fonts at this size.
    fn wrap_width(self) -> usize {
        match self {
            Self::Code => 82,
            Self::Body | Self::Subtitle => 85,
            Self::Heading => 60,
            Self::Title => 40,
        }
    }
}

/// A positioned line of text on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub style: TextStyle,
    pub text: String,
    pub x: f32,
    pub y: f32,
    /// Set when the line continues a wrapped line above it.
    pub continuation: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub lines: Vec<PlacedLine>,
}

/// A laid-out PDF ready to be written next to the audited source.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    path: PathBuf,
    pages: Vec<Page>,
    bytes: Vec<u8>,
}

impl RenderedDocument {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write the document and resolve only after the data reached the disk.
    ///
    /// The file handle is closed on every path; a partially written file is removed.
    pub async fn write(&self) -> Result<PathBuf, ExportError> {
        let io_error = |source| ExportError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = File::create(&self.path).await.map_err(io_error)?;
        if let Err(source) = write_durably(&mut file, &self.bytes).await {
            drop(file);
            let _ = fs::remove_file(&self.path).await;
            return Err(io_error(source));
        }
        debug!(path = %self.path.display(), bytes = self.bytes.len(), "audit document written");
        Ok(self.path.clone())
    }
}

async fn write_durably(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// `contract.sol` becomes `contract-audit-report.pdf` in the same directory.
pub fn document_path(source_path: &Path) -> PathBuf {
    let stem = source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "contract".to_string());
    source_path.with_file_name(format!("{stem}{REPORT_SUFFIX}"))
}

/// Renders a report as a paginated PDF using the built-in Helvetica and Courier fonts.
#[derive(Debug, Clone)]
pub struct DocumentRenderer {
    source_path: PathBuf,
}

impl DocumentRenderer {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        document_path(&self.source_path)
    }
}

impl ReportRenderer for DocumentRenderer {
    type Output = RenderedDocument;

    fn render(&self, report: &AuditReport) -> anyhow::Result<Self::Output> {
        let pages = layout(report, &self.source_path);
        let bytes = encode(&pages).context("failed to encode audit PDF")?;
        Ok(RenderedDocument {
            path: self.output_path(),
            pages,
            bytes,
        })
    }
}

struct Layout {
    pages: Vec<Page>,
    current: Page,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Page::default(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn push(&mut self, style: TextStyle, text: &str) {
        let x = match style {
            TextStyle::Title => centered_x(style, text),
            TextStyle::Code => MARGIN + CODE_INDENT,
            _ => MARGIN,
        };
        for (idx, chunk) in wrap(text, style.wrap_width()).into_iter().enumerate() {
            if self.y - style.leading() < MARGIN && !self.current.lines.is_empty() {
                self.pages.push(std::mem::take(&mut self.current));
                self.y = PAGE_HEIGHT - MARGIN;
            }
            self.y -= style.leading();
            self.current.lines.push(PlacedLine {
                style,
                text: chunk,
                x,
                y: self.y,
                continuation: idx > 0,
            });
        }
    }

    fn gap(&mut self, points: f32) {
        self.y -= points;
    }

    fn finish(mut self) -> Vec<Page> {
        if !self.current.lines.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

fn centered_x(style: TextStyle, text: &str) -> f32 {
    let approx_width = text.chars().count() as f32 * style.size() * 0.55;
    ((PAGE_WIDTH - approx_width) / 2.0).max(MARGIN)
}

fn layout(report: &AuditReport, source_path: &Path) -> Vec<Page> {
    let mut layout = Layout::new();
    layout.push(TextStyle::Title, TITLE);
    layout.push(
        TextStyle::Subtitle,
        &format!("Audit for contract at: {}", source_path.display()),
    );

    for section in sections(report) {
        layout.gap(6.0);
        layout.push(TextStyle::Heading, section.title());
        for entry in &section.entries {
            match entry {
                Entry::Paragraph(text) => {
                    for line in text.split('\n') {
                        layout.push(TextStyle::Body, line);
                    }
                }
                Entry::Empty(text) => layout.push(TextStyle::Body, text),
                _ => {
                    let label = entry.label();
                    if section.kind == SectionKind::Suggestions {
                        layout.push(TextStyle::Body, &format!("- {label}"));
                    } else {
                        layout.push(TextStyle::Body, &label);
                    }
                    if let Some(detail) = entry.detail() {
                        for line in detail.lines() {
                            layout.push(TextStyle::Code, line);
                        }
                    }
                }
            }
        }
    }
    layout.finish()
}

/// Greedy word wrap; words longer than `width` are split. Always yields at least one line.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }
        if current.is_empty() {
            current = word;
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// WinAnsiEncoding code points in 0x80..=0x9F that differ from Latin-1.
const WIN_ANSI_HIGH: [(char, u8); 27] = [
    ('\u{20ac}', 0x80),
    ('\u{201a}', 0x82),
    ('\u{0192}', 0x83),
    ('\u{201e}', 0x84),
    ('\u{2026}', 0x85),
    ('\u{2020}', 0x86),
    ('\u{2021}', 0x87),
    ('\u{02c6}', 0x88),
    ('\u{2030}', 0x89),
    ('\u{0160}', 0x8a),
    ('\u{2039}', 0x8b),
    ('\u{0152}', 0x8c),
    ('\u{017d}', 0x8e),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201c}', 0x93),
    ('\u{201d}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{02dc}', 0x98),
    ('\u{2122}', 0x99),
    ('\u{0161}', 0x9a),
    ('\u{203a}', 0x9b),
    ('\u{0153}', 0x9c),
    ('\u{017e}', 0x9e),
    ('\u{0178}', 0x9f),
];

/// Map text onto WinAnsi bytes understood by the standard PDF fonts.
/// Characters the encoding lacks become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            _ => WIN_ANSI_HIGH
                .iter()
                .find(|(mapped, _)| *mapped == c)
                .map_or(b'?', |(_, byte)| *byte),
        })
        .collect()
}

fn encode(pages: &[Page]) -> anyhow::Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font = |doc: &mut Document, base: &str| {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base,
            "Encoding" => "WinAnsiEncoding",
        })
    };
    let regular = font(&mut doc, "Helvetica");
    let bold = font(&mut doc, "Helvetica-Bold");
    let mono = font(&mut doc, "Courier");
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
            "F3" => mono,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let mut operations = Vec::with_capacity(page.lines.len() * 5);
        for line in &page.lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![line.style.font().into(), line.style.size().into()],
            ));
            operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(win_ansi(&line.text))],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::from(0),
                Object::from(0),
                Object::from(PAGE_WIDTH),
                Object::from(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
