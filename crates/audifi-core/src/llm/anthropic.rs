use super::{
    empty_answer, http_client, status_error, transport_error, ModelClient, ProviderSettings,
};
use crate::error::AuditError;
use crate::request::Credential;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 4096;
const SYSTEM_PROMPT: &str = "You are a meticulous smart-contract security auditor. Answer only with the JSON structure the user asks for.";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    url: String,
    model: String,
    api_version: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = http_client(settings).context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            http,
            url,
            model: settings
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_version: settings
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str, credential: &Credential) -> Result<String, AuditError> {
        let payload = AnthropicRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_OUTPUT_TOKENS,
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", credential.expose())
            .header("anthropic-version", &self.api_version)
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport_error("anthropic", err, self.timeout))?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let message: AnthropicResponse = response.json().await.map_err(|err| {
            AuditError::UnexpectedResponse(format!("failed to decode Anthropic response: {err}"))
        })?;
        let text = message
            .content
            .into_iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text)
            .collect::<String>();
        if text.trim().is_empty() {
            return Err(empty_answer("anthropic"));
        }
        Ok(text)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'static str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn base_settings(url: String) -> ProviderSettings {
        ProviderSettings {
            provider: "anthropic".into(),
            endpoint: Some(url),
            model: Some("claude-test".into()),
            timeout_secs: Some(5),
            max_retries: 0,
            api_version: None,
        }
    }

    #[test]
    fn api_version_defaults_and_overrides() {
        let mut settings = base_settings("https://example.com".into());
        let client = AnthropicClient::new(&settings).unwrap();
        assert_eq!(client.api_version, DEFAULT_API_VERSION);
        settings.api_version = Some("2024-01-01".into());
        let client = AnthropicClient::new(&settings).unwrap();
        assert_eq!(client.api_version, "2024-01-01");
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn complete_returns_text_blocks() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "test-key")
                .header("anthropic-version", DEFAULT_API_VERSION);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"content":[{"type":"text","text":"[{\"section\":\"Audit Report\"}]"}]}"#);
        });

        let client = AnthropicClient::new(&base_settings(server.base_url())).unwrap();
        let text = client
            .complete("hello", &Credential::new("test-key").unwrap())
            .await
            .unwrap();
        assert_eq!(text, r#"[{"section":"Audit Report"}]"#);
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn server_error_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(500);
        });

        let client = AnthropicClient::new(&base_settings(server.base_url())).unwrap();
        let err = client
            .complete("hello", &Credential::new("test-key").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ProviderUnavailable(_)));
        mock.assert_hits(1);
    }
}
