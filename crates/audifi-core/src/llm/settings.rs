use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Provider selection and tuning. Credentials are supplied per call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub api_version: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            endpoint: None,
            model: None,
            timeout_secs: None,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            api_version: None,
        }
    }
}

impl ProviderSettings {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    const PROVIDER_ENV: &'static str = "AUDIFI_PROVIDER";
    const ENDPOINT_ENV: &'static str = "AUDIFI_ENDPOINT";
    const MODEL_ENV: &'static str = "AUDIFI_MODEL";
    const TIMEOUT_ENV: &'static str = "AUDIFI_TIMEOUT_SECS";
    const RETRIES_ENV: &'static str = "AUDIFI_MAX_RETRIES";
    const API_VERSION_ENV: &'static str = "AUDIFI_API_VERSION";

    /// Load settings from environment variables.
    ///
    /// * `AUDIFI_PROVIDER`: Provider identifier (default: `gemini`).
    /// * `AUDIFI_ENDPOINT`: Optional base URL, or the response file for `replay`.
    /// * `AUDIFI_MODEL`: Optional model override.
    /// * `AUDIFI_TIMEOUT_SECS` / `AUDIFI_MAX_RETRIES`: Call bound and retry budget.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let value = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let provider = value(Self::PROVIDER_ENV).unwrap_or_else(|| "gemini".to_string());
        let timeout_secs = value(Self::TIMEOUT_ENV)
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("{} must be a whole number of seconds", Self::TIMEOUT_ENV))
            })
            .transpose()?;
        let max_retries = value(Self::RETRIES_ENV)
            .map(|v| {
                v.parse::<u32>()
                    .with_context(|| format!("{} must be a non-negative integer", Self::RETRIES_ENV))
            })
            .transpose()?
            .unwrap_or(Self::DEFAULT_MAX_RETRIES);

        Ok(Self {
            provider,
            endpoint: value(Self::ENDPOINT_ENV),
            model: value(Self::MODEL_ENV),
            timeout_secs,
            max_retries,
            api_version: value(Self::API_VERSION_ENV),
        })
    }

    /// Upper bound for a single model call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS).max(1))
    }
}
