//! User-delegated (3-legged) authorization-code flow
//!
//! A two-phase protocol correlated only by session and state value:
//!
//! 1. [`ThreeLeggedFlow::initiate`] stores a random `authState` in the session
//!    and returns the provider redirect.
//! 2. [`ThreeLeggedFlow::handle_callback`] redeems that state exactly once and
//!    exchanges the code for a token pair stored as `tokenInfo`.
//!
//! After that, [`ThreeLeggedFlow::ensure_valid`] keeps the stored token
//! usable, refreshing it inside the 5 minute margin.
//!
//! Concurrent requests of one user may refresh at the same time; each stores
//! its own record and the last write wins.

use super::requester::{Grant, TokenRequester};
use crate::constants::{AUTH_STATE_BYTES, SESSION_KEY_AUTH_STATE, SESSION_KEY_TOKEN_INFO};
use crate::http::session::Session;
use crate::model::TokenRecord;
use crate::{BrokerError, Result, telemetry};
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use url::Url;

/// Controller for the per-user authorization-code flow
#[derive(Clone)]
pub struct ThreeLeggedFlow {
    requester: Arc<TokenRequester>,
    scopes: Vec<String>,
}

impl ThreeLeggedFlow {
    pub fn new(requester: Arc<TokenRequester>, scopes: Vec<String>) -> Self {
        Self { requester, scopes }
    }

    /// Start an authorization attempt and return the provider redirect URL
    ///
    /// A previous pending state in the same session is replaced.
    pub async fn initiate(&self, session: &Session) -> Result<Url> {
        let state = crate::utils::random_hex(AUTH_STATE_BYTES);
        session.set(SESSION_KEY_AUTH_STATE, &state).await?;

        tracing::debug!(session = session.id(), "Authorization flow initiated");
        Ok(self.requester.authorize_url(&self.scopes, state))
    }

    /// Redeem the callback: verify `state`, then exchange `code`
    ///
    /// The pending state is cleared whether or not it matched, so a state
    /// value can be redeemed at most once.
    pub async fn handle_callback(
        &self,
        session: &Session,
        code: &str,
        state: &str,
    ) -> Result<TokenRecord> {
        let pending: Option<String> = session.get(SESSION_KEY_AUTH_STATE).await?;
        session.clear(SESSION_KEY_AUTH_STATE).await?;

        let matches = pending
            .as_deref()
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(state.as_bytes())));

        if !matches {
            tracing::warn!(
                session = session.id(),
                pending = pending.is_some(),
                "Authorization state mismatch, possible CSRF"
            );
            return Err(BrokerError::security(
                "Authorization state mismatch: possible CSRF attack detected",
            ));
        }

        let record = self
            .requester
            .request_token(Grant::AuthorizationCode {
                code: code.to_string(),
            })
            .await?;

        session.set(SESSION_KEY_TOKEN_INFO, &record).await?;
        tracing::info!(
            session = session.id(),
            expires_at = %record.expires_at,
            "User authenticated"
        );

        Ok(record)
    }

    /// Return the session's token, refreshing it when inside the margin
    ///
    /// Fails with `Unauthenticated` when there is no token, or when the
    /// refresh fails; in the latter case the session auth state is cleared
    /// so no record of ambiguous validity survives.
    ///
    /// A successful refresh is returned as issued, even when the provider
    /// grants a lifetime shorter than the refresh margin. The next call then
    /// refreshes again.
    pub async fn ensure_valid(&self, session: &Session) -> Result<TokenRecord> {
        let record: TokenRecord = session
            .get(SESSION_KEY_TOKEN_INFO)
            .await?
            .ok_or_else(|| BrokerError::unauthenticated("No token in session"))?;

        if !record.needs_refresh_at(Utc::now()) {
            return Ok(record);
        }

        tracing::info!(session = session.id(), "Session token near expiry, refreshing");

        let refreshed = match record.refresh_token {
            Some(refresh_token) => self
                .requester
                .request_token(Grant::RefreshToken { refresh_token })
                .await
                .map_err(|e| e.to_string()),
            None => Err("Session token has no refresh token".to_string()),
        };

        match refreshed {
            Ok(new_record) => {
                session.set(SESSION_KEY_TOKEN_INFO, &new_record).await?;
                telemetry::record_session_refresh("success");
                Ok(new_record)
            }
            Err(reason) => {
                telemetry::record_session_refresh("failure");
                tracing::warn!(
                    session = session.id(),
                    reason = %reason,
                    "Token refresh failed, clearing session auth state"
                );
                self.clear_auth_state(session).await?;
                Err(BrokerError::unauthenticated(format!(
                    "Token refresh failed: {}",
                    reason
                )))
            }
        }
    }

    /// Destroy all session-held authentication state. Idempotent.
    pub async fn logout(&self, session: &Session) -> Result<()> {
        session.destroy().await?;
        tracing::info!(session = session.id(), "Session logged out");
        Ok(())
    }

    async fn clear_auth_state(&self, session: &Session) -> Result<()> {
        session.clear(SESSION_KEY_TOKEN_INFO).await?;
        session.clear(SESSION_KEY_AUTH_STATE).await
    }
}
