pub mod console;
pub mod document;

use crate::report::{AuditReport, Metric, RiskLevel, ScoreBand};

pub use console::{ConsoleLine, ConsoleRenderer, LineKind};
pub use document::{document_path, DocumentRenderer, RenderedDocument};

/// Output channel for a validated report.
pub trait ReportRenderer {
    type Output;

    fn render(&self, report: &AuditReport) -> anyhow::Result<Self::Output>;
}

/// Semantic tag attached to a rendered entry; display is left to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    Band(ScoreBand),
    Risk(RiskLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Narrative,
    Metrics,
    Suggestions,
    Findings,
}

impl SectionKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Narrative => "Audit Report",
            Self::Metrics => "Metric Scores",
            Self::Suggestions => "Suggestions for Improvement",
            Self::Findings => "Risk Levels",
        }
    }
}

/// One renderable item inside a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Paragraph(String),
    Metric {
        metric: Metric,
        score: u8,
        band: ScoreBand,
    },
    Suggestion {
        text: String,
        related_finding: Option<String>,
    },
    Finding {
        vulnerability: String,
        risk: RiskLevel,
        line: Option<u32>,
        code_snippet: Option<String>,
    },
    /// Placeholder for a section the model left empty.
    Empty(&'static str),
}

impl Entry {
    /// Headline text for the entry, identical across every sink.
    pub fn label(&self) -> String {
        match self {
            Self::Paragraph(text) => text.clone(),
            Self::Metric {
                metric,
                score,
                band,
            } => format!("{metric}: {score}/10 ({})", band.as_str()),
            Self::Suggestion {
                text,
                related_finding: Some(related),
            } => format!("{text} (re: {related})"),
            Self::Suggestion { text, .. } => text.clone(),
            Self::Finding {
                vulnerability,
                risk,
                line: Some(line),
                ..
            } => format!("{vulnerability}: {risk} (line {line})"),
            Self::Finding {
                vulnerability,
                risk,
                ..
            } => format!("{vulnerability}: {risk}"),
            Self::Empty(text) => (*text).to_string(),
        }
    }

    pub fn annotation(&self) -> Option<Annotation> {
        match self {
            Self::Metric { band, .. } => Some(Annotation::Band(*band)),
            Self::Finding { risk, .. } => Some(Annotation::Risk(*risk)),
            _ => None,
        }
    }

    /// Code excerpt shown beneath a finding, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Finding {
                code_snippet: Some(snippet),
                ..
            } => Some(snippet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }
}

/// Flatten a report into the ordered section list every renderer consumes.
pub fn sections(report: &AuditReport) -> Vec<Section> {
    let narrative = vec![Entry::Paragraph(report.narrative().to_string())];

    let metrics = report
        .metrics()
        .iter()
        .map(|score| Entry::Metric {
            metric: score.metric,
            score: score.score,
            band: score.band(),
        })
        .collect();

    let mut suggestions: Vec<Entry> = report
        .suggestions()
        .iter()
        .map(|suggestion| Entry::Suggestion {
            text: suggestion.text.clone(),
            related_finding: suggestion.related_finding.clone(),
        })
        .collect();
    if suggestions.is_empty() {
        suggestions.push(Entry::Empty("No suggestions provided."));
    }

    let mut findings: Vec<Entry> = report
        .findings()
        .iter()
        .map(|finding| Entry::Finding {
            vulnerability: finding.vulnerability.clone(),
            risk: finding.risk,
            line: finding.line,
            code_snippet: finding.code_snippet.clone(),
        })
        .collect();
    if findings.is_empty() {
        findings.push(Entry::Empty("No vulnerabilities reported."));
    }

    vec![
        Section {
            kind: SectionKind::Narrative,
            entries: narrative,
        },
        Section {
            kind: SectionKind::Metrics,
            entries: metrics,
        },
        Section {
            kind: SectionKind::Suggestions,
            entries: suggestions,
        },
        Section {
            kind: SectionKind::Findings,
            entries: findings,
        },
    ]
}
