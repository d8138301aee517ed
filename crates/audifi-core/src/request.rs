use std::fmt;

use crate::error::AuditError;

/// Provider API key. Never printed, serialized or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Result<Self, AuditError> {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(AuditError::InvalidInput(
                "provider API key must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Everything one audit run needs from its caller.
#[derive(Debug, Clone)]
pub struct AuditRequest {
    source_text: String,
    credential: Credential,
}

impl AuditRequest {
    pub fn new(source_text: impl Into<String>, credential: Credential) -> Self {
        Self {
            source_text: source_text.into(),
            credential,
        }
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}
