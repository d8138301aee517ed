use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Number of characters of raw model output kept in diagnostics.
const RAW_EXCERPT_CHARS: usize = 400;

/// Failures surfaced by the audit pipeline and its stages.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication with the model provider failed: {0}")]
    AuthenticationFailed(String),
    #[error("model provider is rate limiting requests{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("model provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("unexpected response from model provider: {0}")]
    UnexpectedResponse(String),
    /// The model answered, but not with a report that passes validation.
    #[error("malformed model output: {reason}")]
    MalformedModelOutput { reason: String, raw: String },
    #[error("failed to render report: {0}")]
    Render(String),
}

impl AuditError {
    pub(crate) fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        Self::MalformedModelOutput {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }

    /// Whether retrying the model call may succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ProviderUnavailable(_) | Self::Timeout(_)
        )
    }

    /// Leading part of the offending model output, if this is a parse failure.
    pub fn raw_excerpt(&self) -> Option<String> {
        match self {
            Self::MalformedModelOutput { raw, .. } => Some(truncate(raw, RAW_EXCERPT_CHARS)),
            _ => None,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

/// Failures while exporting an already validated report to a document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to lay out audit document: {0}")]
    Render(String),
    #[error("failed to write audit document to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}
