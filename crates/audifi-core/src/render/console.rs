use std::fmt;

use super::{sections, Annotation, Entry, ReportRenderer, SectionKind};
use crate::report::AuditReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heading,
    Text,
    Item,
    Blank,
}

/// One console line plus the semantic tag a terminal may choose to colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub kind: LineKind,
    pub text: String,
    pub annotation: Option<Annotation>,
}

impl ConsoleLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            annotation: None,
        }
    }
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Renders a report as plain ASCII lines, one section after another.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleRenderer;

impl ReportRenderer for ConsoleRenderer {
    type Output = Vec<ConsoleLine>;

    fn render(&self, report: &AuditReport) -> anyhow::Result<Self::Output> {
        let mut lines = Vec::new();
        for (idx, section) in sections(report).iter().enumerate() {
            if idx > 0 {
                lines.push(ConsoleLine::new(LineKind::Blank, ""));
            }
            lines.push(ConsoleLine::new(
                LineKind::Heading,
                format!("=== {} ===", section.title()),
            ));
            for entry in &section.entries {
                render_entry(section.kind, entry, &mut lines);
            }
        }
        Ok(lines)
    }
}

fn render_entry(kind: SectionKind, entry: &Entry, lines: &mut Vec<ConsoleLine>) {
    match entry {
        Entry::Paragraph(text) => {
            lines.extend(
                text.split('\n')
                    .map(|line| ConsoleLine::new(LineKind::Text, line)),
            );
        }
        Entry::Empty(text) => lines.push(ConsoleLine::new(LineKind::Text, *text)),
        _ => {
            let label = entry.label();
            let text = if kind == SectionKind::Suggestions {
                format!("- {label}")
            } else {
                label
            };
            lines.push(ConsoleLine {
                kind: LineKind::Item,
                text,
                annotation: entry.annotation(),
            });
            if let Some(detail) = entry.detail() {
                lines.extend(
                    detail
                        .lines()
                        .map(|line| ConsoleLine::new(LineKind::Text, format!("    {line}"))),
                );
            }
        }
    }
}
