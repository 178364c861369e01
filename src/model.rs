//! Core data structures for the broker
//!
//! Token records, the auth mode selector and the resource types returned
//! by the APS account endpoints.

use crate::constants::REFRESH_MARGIN_MS;
use crate::{BrokerError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An access token together with its absolute expiry.
///
/// `expires_at` is fixed when the provider response arrives and never
/// recomputed. Records without a refresh token can only be reacquired.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Build a record issued at `issued_at` with the provider-reported lifetime
    ///
    /// `None` when the lifetime does not fit a timestamp.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: std::time::Duration,
        issued_at: DateTime<Utc>,
    ) -> Option<Self> {
        let lifetime = Duration::from_std(expires_in).ok()?;
        let expires_at = issued_at.checked_add_signed(lifetime)?;

        Some(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// True once `now` has reached `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True once `now` is inside the proactive refresh window
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::milliseconds(REFRESH_MARGIN_MS)
    }

    /// Whole seconds left before expiry (negative once expired)
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }

    /// Expiry metadata safe to hand to clients
    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        TokenStatus {
            expires_at: self.expires_at,
            remaining_secs: self.remaining_secs(now),
        }
    }
}

// Token material stays out of logs
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Public expiry metadata for a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: i64,
}

/// Which grant flow a request wants its token from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMode {
    /// User-delegated authorization-code flow
    #[default]
    #[serde(rename = "3legged")]
    ThreeLegged,
    /// Application-only client-credentials flow
    #[serde(rename = "2legged")]
    TwoLegged,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::ThreeLegged => "3legged",
            AuthMode::TwoLegged => "2legged",
        }
    }

    /// Human-readable label used in responses
    pub fn label(&self) -> &'static str {
        match self {
            AuthMode::ThreeLegged => "3-legged",
            AuthMode::TwoLegged => "2-legged",
        }
    }

    /// Parse an optional selector; absent means 3-legged
    pub fn from_selector(selector: Option<&str>) -> Result<Self> {
        match selector {
            None => Ok(AuthMode::default()),
            Some(value) => value.parse(),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "3legged" => Ok(AuthMode::ThreeLegged),
            "2legged" => Ok(AuthMode::TwoLegged),
            other => Err(BrokerError::caller_contract(format!(
                "Invalid authType '{}'. Expected '3legged' or '2legged'",
                other
            ))),
        }
    }
}

/// A user of an APS account as returned by the HQ users endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUser {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    /// Autodesk identity id of the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Remaining fields are passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
