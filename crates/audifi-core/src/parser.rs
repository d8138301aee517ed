//! Turns free-form model output into a validated [`AuditReport`].
//!
//! Model text is untrusted: the payload is located by bracket matching,
//! decoded into a tagged wire shape, repaired at most once, and then pushed
//! through the domain constructors so every invariant is checked. Nothing
//! missing is ever filled in with defaults.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::AuditError;
use crate::report::{
    AuditReport, Metric, MetricScore, ReportValidationError, RiskFinding, RiskLevel, Suggestion,
};

/// Parse raw model output into a report.
pub fn parse(raw_text: &str) -> Result<AuditReport, AuditError> {
    let region = extract_payload(raw_text).ok_or_else(|| {
        AuditError::malformed(
            "no balanced JSON array or object found in model output",
            raw_text,
        )
    })?;
    let payload = decode_payload(region).map_err(|reason| AuditError::malformed(reason, raw_text))?;
    payload
        .into_report()
        .map_err(|err| AuditError::malformed(err.to_string(), raw_text))
}

/// Locate the outermost balanced bracketed region starting at the first `[` or `{`.
///
/// Brackets inside double- or single-quoted strings are ignored. Returns `None`
/// when the region never closes (for example truncated output) or the brackets
/// do not pair up.
pub fn extract_payload(raw: &str) -> Option<&str> {
    let start = raw.find(['[', '{'])?;
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escape = false;

    for (offset, ch) in raw[start..].char_indices() {
        if let Some(open) = quote {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' | '{' => stack.push(ch),
            ']' | '}' => {
                let open = stack.pop()?;
                if (open == '[') != (ch == ']') {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(&raw[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

fn decode_payload(region: &str) -> Result<WirePayload, String> {
    match decode_strict(region) {
        Ok(payload) => Ok(payload),
        Err(strict_err) => {
            debug!(error = %strict_err, "strict decode of model output failed; attempting repair");
            decode_repaired(region).map_err(|repair_err| {
                format!("could not decode report payload: {strict_err} (after repair: {repair_err})")
            })
        }
    }
}

fn decode_strict(region: &str) -> Result<WirePayload, serde_json::Error> {
    if region.starts_with('[') {
        serde_json::from_str(region).map(WirePayload::Sections)
    } else {
        serde_json::from_str(region).map(WirePayload::Object)
    }
}

/// Single tolerant retry: escape raw newlines in strings, then decode as JSON5,
/// which accepts trailing commas and comments.
fn decode_repaired(region: &str) -> Result<WirePayload, String> {
    let sanitized = escape_raw_newlines(region);
    let value: Value = json5::from_str(&sanitized).map_err(|err| err.to_string())?;
    if value.is_array() {
        from_value(value).map(WirePayload::Sections)
    } else {
        from_value(value).map(WirePayload::Object)
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|err| err.to_string())
}

fn escape_raw_newlines(payload: &str) -> String {
    let mut result = String::with_capacity(payload.len());
    let mut quote: Option<char> = None;
    let mut escape = false;

    for ch in payload.chars() {
        let Some(open) = quote else {
            result.push(ch);
            if ch == '"' || ch == '\'' {
                quote = Some(ch);
            }
            continue;
        };
        if escape {
            result.push(ch);
            escape = false;
            continue;
        }
        match ch {
            '\\' => {
                result.push(ch);
                escape = true;
            }
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => {
                result.push(ch);
                if ch == open {
                    quote = None;
                }
            }
        }
    }
    result
}

enum WirePayload {
    Sections(Vec<WireSection>),
    Object(WireReport),
}

#[derive(Deserialize)]
#[serde(tag = "section", content = "details")]
enum WireSection {
    #[serde(rename = "Audit Report")]
    Narrative(String),
    #[serde(rename = "Metric Scores")]
    Metrics(Vec<WireMetric>),
    #[serde(rename = "Suggestions for Improvement")]
    Suggestions(Vec<WireSuggestion>),
    #[serde(rename = "Risk Levels")]
    Findings(Vec<WireFinding>),
}

impl WireSection {
    fn name(&self) -> &'static str {
        match self {
            Self::Narrative(_) => "Audit Report",
            Self::Metrics(_) => "Metric Scores",
            Self::Suggestions(_) => "Suggestions for Improvement",
            Self::Findings(_) => "Risk Levels",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReport {
    narrative: String,
    metrics: Vec<WireMetric>,
    suggestions: Vec<WireSuggestion>,
    findings: Vec<WireFinding>,
}

#[derive(Deserialize)]
struct WireMetric {
    metric: String,
    score: Number,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireSuggestion {
    Plain(String),
    Detailed {
        text: String,
        #[serde(default, rename = "relatedFinding")]
        related_finding: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFinding {
    vulnerability: String,
    risk: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    code_snippet: Option<String>,
}

impl WirePayload {
    fn into_report(self) -> Result<AuditReport, ParseFailure> {
        let wire = match self {
            Self::Object(report) => report,
            Self::Sections(sections) => collect_sections(sections)?,
        };
        let metrics = wire
            .metrics
            .into_iter()
            .map(WireMetric::into_score)
            .collect::<Result<Vec<_>, _>>()?;
        let suggestions = wire
            .suggestions
            .into_iter()
            .map(WireSuggestion::into_suggestion)
            .collect::<Result<Vec<_>, _>>()?;
        let findings = wire
            .findings
            .into_iter()
            .map(WireFinding::into_finding)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AuditReport::new(
            wire.narrative,
            metrics,
            suggestions,
            findings,
        )?)
    }
}

fn collect_sections(sections: Vec<WireSection>) -> Result<WireReport, ParseFailure> {
    let mut narrative = None;
    let mut metrics = None;
    let mut suggestions = None;
    let mut findings = None;

    for section in sections {
        let name = section.name();
        let duplicate = match section {
            WireSection::Narrative(text) => narrative.replace(text).is_some(),
            WireSection::Metrics(items) => metrics.replace(items).is_some(),
            WireSection::Suggestions(items) => suggestions.replace(items).is_some(),
            WireSection::Findings(items) => findings.replace(items).is_some(),
        };
        if duplicate {
            return Err(ParseFailure::DuplicateSection(name));
        }
    }

    Ok(WireReport {
        narrative: narrative.ok_or(ParseFailure::MissingSection("Audit Report"))?,
        metrics: metrics.ok_or(ParseFailure::MissingSection("Metric Scores"))?,
        suggestions: suggestions
            .ok_or(ParseFailure::MissingSection("Suggestions for Improvement"))?,
        findings: findings.ok_or(ParseFailure::MissingSection("Risk Levels"))?,
    })
}

impl WireMetric {
    fn into_score(self) -> Result<MetricScore, ReportValidationError> {
        let metric: Metric = self.metric.parse()?;
        let score = integral(&self.score).ok_or_else(|| ReportValidationError::NonIntegralScore {
            metric,
            value: self.score.to_string(),
        })?;
        MetricScore::new(metric, score)
    }
}

/// Integer value of a JSON number; `9.0` counts, `7.5` does not.
fn integral(number: &Number) -> Option<i64> {
    if let Some(value) = number.as_i64() {
        return Some(value);
    }
    if number.is_u64() {
        return Some(i64::MAX);
    }
    let value = number.as_f64()?;
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Some(value as i64)
    } else {
        None
    }
}

impl WireSuggestion {
    fn into_suggestion(self) -> Result<Suggestion, ReportValidationError> {
        match self {
            Self::Plain(text) => Suggestion::new(text, None),
            Self::Detailed {
                text,
                related_finding,
            } => Suggestion::new(text, related_finding),
        }
    }
}

impl WireFinding {
    fn into_finding(self) -> Result<RiskFinding, ReportValidationError> {
        let risk: RiskLevel = self.risk.parse()?;
        RiskFinding::new(self.vulnerability, risk, self.line, self.code_snippet)
    }
}

#[derive(Debug, thiserror::Error)]
enum ParseFailure {
    #[error("required section `{0}` is missing")]
    MissingSection(&'static str),
    #[error("section `{0}` appears more than once")]
    DuplicateSection(&'static str),
    #[error(transparent)]
    Invalid(#[from] ReportValidationError),
}
