mod anthropic;
mod gemini;
mod openai;
mod replay;
mod settings;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

use crate::error::{truncate, AuditError};
use crate::request::Credential;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use replay::ReplayClient;
pub use settings::ProviderSettings;

const USER_AGENT: &str = concat!("audifi/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_CHARS: usize = 300;

/// Sends one prompt to a model provider and returns its raw text answer.
///
/// Implementations perform exactly one request per call and never retry;
/// every failure comes back as a typed [`AuditError`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short provider name used in logs.
    fn provider(&self) -> &'static str;

    async fn complete(&self, prompt: &str, credential: &Credential) -> Result<String, AuditError>;
}

/// Providers selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
    /// Serves a previously recorded model response from disk.
    Replay,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "replay" => Ok(Self::Replay),
            other => bail!("unsupported provider `{other}` (expected gemini, openai, anthropic or replay)"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Replay => "replay",
        })
    }
}

/// Construct the client selected by `settings.provider`.
pub fn build_client(settings: &ProviderSettings) -> Result<Box<dyn ModelClient>> {
    let kind: ProviderKind = settings.provider.parse()?;
    tracing::debug!(provider = %kind, model = ?settings.model, "building model client");
    Ok(match kind {
        ProviderKind::Gemini => Box::new(GeminiClient::new(settings)?),
        ProviderKind::OpenAi => Box::new(OpenAiClient::new(settings)?),
        ProviderKind::Anthropic => Box::new(AnthropicClient::new(settings)?),
        ProviderKind::Replay => Box::new(ReplayClient::new(settings)?),
    })
}

fn http_client(settings: &ProviderSettings) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(settings.timeout())
        .build()?)
}

/// Map a transport failure onto the shared error taxonomy.
fn transport_error(provider: &str, err: reqwest::Error, timeout: Duration) -> AuditError {
    if err.is_timeout() {
        AuditError::Timeout(timeout)
    } else {
        AuditError::ProviderUnavailable(format!("{provider} request failed: {err}"))
    }
}

/// Turn a non-success response into a typed error, consuming the body for diagnostics.
async fn status_error(provider: &str, response: Response) -> AuditError {
    let status = response.status();
    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, status, retry_after, &body)
}

fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> AuditError {
    let detail = format!("{provider} returned {status}: {}", truncate(body.trim(), ERROR_BODY_CHARS));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuditError::AuthenticationFailed(detail),
        StatusCode::TOO_MANY_REQUESTS => AuditError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            AuditError::ProviderUnavailable(detail)
        }
        s if s.is_server_error() => AuditError::ProviderUnavailable(detail),
        _ => AuditError::UnexpectedResponse(detail),
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn empty_answer(provider: &str) -> AuditError {
    AuditError::UnexpectedResponse(format!("{provider} response contained no text"))
}
