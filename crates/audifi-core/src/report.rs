use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Quality dimensions the model scores. Declaration order is the canonical render order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Metric {
    Security,
    Performance,
    GasEfficiency,
    CodeQuality,
    Documentation,
    Other,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Security,
        Metric::Performance,
        Metric::GasEfficiency,
        Metric::CodeQuality,
        Metric::Documentation,
        Metric::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Security => "Security",
            Metric::Performance => "Performance",
            Metric::GasEfficiency => "GasEfficiency",
            Metric::CodeQuality => "CodeQuality",
            Metric::Documentation => "Documentation",
            Metric::Other => "Other",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ReportValidationError;

    /// Accepts `Gas Efficiency`, `gas_efficiency`, `GasEfficiency` and similar spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let folded = fold_name(value);
        Metric::ALL
            .into_iter()
            .find(|metric| fold_name(metric.as_str()) == folded)
            .ok_or_else(|| ReportValidationError::UnknownMetric(value.to_string()))
    }
}

/// Fixed banding policy applied to metric scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    Good,
    Moderate,
    Poor,
}

impl ScoreBand {
    /// `>= 8` is good, `5..=7` moderate, anything lower poor.
    pub fn from_score(score: u8) -> Self {
        if score >= 8 {
            Self::Good
        } else if score >= 5 {
            Self::Moderate
        } else {
            Self::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Poor => "poor",
        }
    }
}

/// Severity attached to an individual finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ReportValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ReportValidationError::UnknownRisk(value.to_string())),
        }
    }
}

/// Score for a single metric on the 0–10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricScore {
    pub metric: Metric,
    pub score: u8,
}

impl MetricScore {
    pub const MAX_SCORE: i64 = 10;

    /// Validate the range instead of clamping out-of-range model scores.
    pub fn new(metric: Metric, score: i64) -> Result<Self, ReportValidationError> {
        if !(0..=Self::MAX_SCORE).contains(&score) {
            return Err(ReportValidationError::ScoreOutOfRange { metric, score });
        }
        Ok(Self {
            metric,
            score: score as u8,
        })
    }

    pub fn band(&self) -> ScoreBand {
        ScoreBand::from_score(self.score)
    }
}

/// A vulnerability or weakness the model reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskFinding {
    pub vulnerability: String,
    pub risk: RiskLevel,
    pub line: Option<u32>,
    pub code_snippet: Option<String>,
}

impl RiskFinding {
    pub fn new(
        vulnerability: impl Into<String>,
        risk: RiskLevel,
        line: Option<u32>,
        code_snippet: Option<String>,
    ) -> Result<Self, ReportValidationError> {
        let finding = Self {
            vulnerability: vulnerability.into().trim().to_string(),
            risk,
            line,
            code_snippet: code_snippet.filter(|snippet| !snippet.trim().is_empty()),
        };
        finding.validate()?;
        Ok(finding)
    }

    pub fn validate(&self) -> Result<(), ReportValidationError> {
        if self.vulnerability.trim().is_empty() {
            return Err(ReportValidationError::EmptyVulnerability);
        }
        if self.line == Some(0) {
            return Err(ReportValidationError::InvalidLine {
                vulnerability: self.vulnerability.clone(),
            });
        }
        Ok(())
    }
}

/// Improvement advice, optionally tied to a finding by its vulnerability name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub text: String,
    pub related_finding: Option<String>,
}

impl Suggestion {
    pub fn new(
        text: impl Into<String>,
        related_finding: Option<String>,
    ) -> Result<Self, ReportValidationError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(ReportValidationError::EmptySuggestion);
        }
        Ok(Self {
            text,
            related_finding: related_finding
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ReportValidationError> {
        if self.text.trim().is_empty() {
            return Err(ReportValidationError::EmptySuggestion);
        }
        Ok(())
    }
}

/// Validated outcome of auditing one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    narrative: String,
    metrics: Vec<MetricScore>,
    suggestions: Vec<Suggestion>,
    findings: Vec<RiskFinding>,
}

impl AuditReport {
    /// Construct a report, enforcing every invariant and sorting metrics canonically.
    ///
    /// Suggestions and findings keep the order they were given in.
    pub fn new(
        narrative: impl Into<String>,
        mut metrics: Vec<MetricScore>,
        suggestions: Vec<Suggestion>,
        findings: Vec<RiskFinding>,
    ) -> Result<Self, ReportValidationError> {
        let narrative = narrative.into().trim().to_string();
        if narrative.is_empty() {
            return Err(ReportValidationError::EmptyNarrative);
        }
        if metrics.is_empty() {
            return Err(ReportValidationError::NoMetrics);
        }
        let mut seen = HashSet::new();
        for score in &metrics {
            if !seen.insert(score.metric) {
                return Err(ReportValidationError::DuplicateMetric(score.metric));
            }
            if i64::from(score.score) > MetricScore::MAX_SCORE {
                return Err(ReportValidationError::ScoreOutOfRange {
                    metric: score.metric,
                    score: i64::from(score.score),
                });
            }
        }
        for finding in &findings {
            finding.validate()?;
        }
        for suggestion in &suggestions {
            suggestion.validate()?;
            if let Some(related) = &suggestion.related_finding {
                let known = findings
                    .iter()
                    .any(|finding| finding.vulnerability.eq_ignore_ascii_case(related));
                if !known {
                    return Err(ReportValidationError::UnknownRelatedFinding(
                        related.clone(),
                    ));
                }
            }
        }
        metrics.sort_by_key(|score| score.metric);
        Ok(Self {
            narrative,
            metrics,
            suggestions,
            findings,
        })
    }

    pub fn narrative(&self) -> &str {
        &self.narrative
    }

    pub fn metrics(&self) -> &[MetricScore] {
        &self.metrics
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn findings(&self) -> &[RiskFinding] {
        &self.findings
    }
}

/// Invariant violations detected while assembling a report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportValidationError {
    #[error("audit narrative must not be empty")]
    EmptyNarrative,
    #[error("report must contain at least one metric score")]
    NoMetrics,
    #[error("metric `{0}` appears more than once")]
    DuplicateMetric(Metric),
    #[error("unrecognized metric `{0}`")]
    UnknownMetric(String),
    #[error("score for `{metric}` must be an integer within 0..=10 (got {score})")]
    ScoreOutOfRange { metric: Metric, score: i64 },
    #[error("score for `{metric}` must be an integer (got {value})")]
    NonIntegralScore { metric: Metric, value: String },
    #[error("unrecognized risk level `{0}`")]
    UnknownRisk(String),
    #[error("finding vulnerability name must not be empty")]
    EmptyVulnerability,
    #[error("finding `{vulnerability}` line number must be positive")]
    InvalidLine { vulnerability: String },
    #[error("suggestion text must not be empty")]
    EmptySuggestion,
    #[error("suggestion references unknown finding `{0}`")]
    UnknownRelatedFinding(String),
}

fn fold_name(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
