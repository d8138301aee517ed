use super::{
    classify_status, empty_answer, http_client, status_error, transport_error, ModelClient,
    ProviderSettings,
};
use crate::error::AuditError;
use crate::request::Credential;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            model
        );
        let http = http_client(settings).context("failed to build Gemini HTTP client")?;
        Ok(Self {
            http,
            url,
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn provider(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, prompt: &str, credential: &Credential) -> Result<String, AuditError> {
        let payload = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let response = self
            .http
            .post(&self.url)
            .query(&[("key", credential.expose())])
            .json(&payload)
            .send()
            .await
            // The request URL carries the key.
            .map_err(|err| transport_error("gemini", err.without_url(), self.timeout))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            // Gemini reports a rejected key as 400 rather than 401.
            let body = response.text().await.unwrap_or_default();
            if body.contains("API_KEY_INVALID") {
                return Err(AuditError::AuthenticationFailed(
                    "gemini rejected the API key".into(),
                ));
            }
            return Err(classify_status("gemini", status, None, &body));
        }
        if !status.is_success() {
            return Err(status_error("gemini", response).await);
        }

        let message: GeminiResponse = response.json().await.map_err(|err| {
            AuditError::UnexpectedResponse(format!("failed to decode Gemini response: {err}"))
        })?;
        let text = message
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .filter_map(|part| part.text)
            .collect::<String>();
        if text.trim().is_empty() {
            return Err(empty_answer("gemini"));
        }
        Ok(text)
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiResponseContent,
}

#[derive(Deserialize, Default)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}
