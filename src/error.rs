//! Error types for the APS broker
//!
//! The token lifecycle distinguishes four outcomes a caller must be able to
//! tell apart: CSRF defence triggered, session needs a fresh login, the
//! provider (or resource API) failed, and the caller passed bad input.

use serde::Serialize;
use thiserror::Error;

/// Main error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Authorization state mismatch on callback
    #[error("Security error: {0}")]
    Security(String),

    /// No usable session token; the 3-legged flow must be restarted
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid mode selector or pagination parameters
    #[error("Invalid request: {0}")]
    CallerContract(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure talking to the identity provider or the resource API.
///
/// Carries the upstream error payload when one was returned so callers keep
/// the diagnostic detail. Never contains client credentials.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,

    /// Upstream HTTP status of a resource API response. Token endpoint
    /// errors leave it unset and carry only the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Upstream error body (e.g. `{"error": ..., "error_description": ...}`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProviderError {
    /// Error without an upstream response (transport failure, timeout, parse)
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            status: None,
            payload: None,
        }
    }

    /// Error built from an upstream response
    pub fn upstream<S: Into<String>>(
        message: S,
        status: Option<u16>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            message: message.into(),
            status,
            payload,
        }
    }

    /// The provider's `error_description`, falling back to the message
    pub fn description(&self) -> &str {
        self.payload
            .as_ref()
            .and_then(|p| p.get("error_description"))
            .and_then(|d| d.as_str())
            .unwrap_or(&self.message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::transport("Request to upstream timed out")
        } else {
            ProviderError {
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
                payload: None,
            }
        }
    }
}

/// Convenient result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    #[inline]
    pub fn security<S: Into<String>>(msg: S) -> Self {
        BrokerError::Security(msg.into())
    }

    #[inline]
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self {
        BrokerError::Unauthenticated(msg.into())
    }

    #[inline]
    pub fn caller_contract<S: Into<String>>(msg: S) -> Self {
        BrokerError::CallerContract(msg.into())
    }

    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BrokerError::Config(msg.into())
    }

    #[inline]
    pub fn session<S: Into<String>>(msg: S) -> Self {
        BrokerError::Session(msg.into())
    }

    /// True when the caller should be sent back through the 3-legged login
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, BrokerError::Unauthenticated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_prefers_provider_payload() {
        let err = ProviderError::upstream(
            "Token request failed",
            Some(400),
            Some(json!({"error": "invalid_grant", "error_description": "code expired"})),
        );
        assert_eq!(err.description(), "code expired");

        let err = ProviderError::transport("connection refused");
        assert_eq!(err.description(), "connection refused");
    }

    #[test]
    fn test_provider_error_converts_into_broker_error() {
        let err: BrokerError = ProviderError::transport("boom").into();
        assert!(matches!(err, BrokerError::Provider(_)));
        assert!(!err.is_unauthenticated());
        assert!(BrokerError::unauthenticated("x").is_unauthenticated());
    }
}
