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

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str = "You are a meticulous smart-contract security auditor. Answer only with the JSON structure the user asks for.";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = http_client(settings).context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            url,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str, credential: &Credential) -> Result<String, AuditError> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(credential.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport_error("openai", err, self.timeout))?;

        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }

        let chat: ChatCompletionResponse = response.json().await.map_err(|err| {
            AuditError::UnexpectedResponse(format!("failed to decode OpenAI response: {err}"))
        })?;
        chat.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| empty_answer("openai"))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
