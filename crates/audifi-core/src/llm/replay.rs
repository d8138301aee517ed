use std::path::PathBuf;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{ModelClient, ProviderSettings};
use crate::error::AuditError;
use crate::request::Credential;

/// Answers every prompt with a model response recorded earlier, read from
/// the file named by the `endpoint` setting.
#[derive(Debug, Clone)]
pub struct ReplayClient {
    path: PathBuf,
}

impl ReplayClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let Some(endpoint) = settings.endpoint.as_deref() else {
            bail!("replay provider requires the endpoint setting to name a recorded response file");
        };
        Ok(Self {
            path: PathBuf::from(endpoint),
        })
    }
}

#[async_trait]
impl ModelClient for ReplayClient {
    fn provider(&self) -> &'static str {
        "replay"
    }

    async fn complete(&self, _prompt: &str, _credential: &Credential) -> Result<String, AuditError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            AuditError::ProviderUnavailable(format!(
                "failed to read recorded response {}: {err}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: Option<String>) -> ProviderSettings {
        ProviderSettings {
            provider: "replay".into(),
            endpoint,
            ..ProviderSettings::default()
        }
    }

    #[test]
    fn requires_endpoint() {
        let err = ReplayClient::new(&settings(None)).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[tokio::test]
    async fn returns_recorded_text() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "recorded answer").unwrap();
        let client =
            ReplayClient::new(&settings(Some(file.path().display().to_string()))).unwrap();
        let text = client
            .complete("ignored", &Credential::new("k").unwrap())
            .await
            .unwrap();
        assert_eq!(text, "recorded answer");
    }

    #[tokio::test]
    async fn missing_recording_is_unavailable() {
        let client = ReplayClient::new(&settings(Some("/nonexistent/answer.txt".into()))).unwrap();
        let err = client
            .complete("ignored", &Credential::new("k").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ProviderUnavailable(_)));
    }
}
