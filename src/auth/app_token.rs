//! Application-level (2-legged) token cache
//!
//! One token per process, shared by every request that asks for app access.
//! The slot is swapped wholesale on refresh; readers either see the old
//! record or the new one, never a partial update.

use super::requester::{Grant, TokenRequester};
use crate::error::ProviderError;
use crate::model::TokenRecord;
use crate::telemetry;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;

/// Single-slot cache for the client-credentials token
///
/// Concurrent callers that find the slot expired queue on `refresh_lock`;
/// the first one fetches, the rest re-check the slot and reuse its result.
pub struct AppTokenCache {
    requester: Arc<TokenRequester>,
    scopes: Vec<String>,
    slot: RwLock<Option<Arc<TokenRecord>>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl AppTokenCache {
    /// Create an empty cache; the first request acquires the token lazily
    pub fn new(requester: Arc<TokenRequester>, scopes: Vec<String>) -> Self {
        Self {
            requester,
            scopes,
            slot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Return a token whose expiry is still in the future
    ///
    /// Hits the provider only when the slot is empty or expired.
    pub async fn get_valid_app_token(&self) -> Result<Arc<TokenRecord>, ProviderError> {
        if let Some(record) = self.live_record() {
            telemetry::record_app_token_cache("hit");
            return Ok(record);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(record) = self.live_record() {
            telemetry::record_app_token_cache("hit");
            return Ok(record);
        }

        telemetry::record_app_token_cache("miss");
        tracing::info!("App token missing or expired, requesting a new one");
        self.fetch_and_store().await
    }

    /// Fetch a fresh token regardless of the cached one and replace the slot
    pub async fn refresh(&self) -> Result<Arc<TokenRecord>, ProviderError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_store().await
    }

    /// Snapshot of the cached record, expired or not
    pub fn current(&self) -> Option<Arc<TokenRecord>> {
        self.slot.read().clone()
    }

    fn live_record(&self) -> Option<Arc<TokenRecord>> {
        let now = Utc::now();
        self.slot
            .read()
            .as_ref()
            .filter(|record| !record.is_expired_at(now))
            .cloned()
    }

    async fn fetch_and_store(&self) -> Result<Arc<TokenRecord>, ProviderError> {
        let record = self
            .requester
            .request_token(Grant::ClientCredentials {
                scopes: self.scopes.clone(),
            })
            .await?;

        let record = Arc::new(record);
        *self.slot.write() = Some(record.clone());

        tracing::info!(expires_at = %record.expires_at, "App token cached");
        Ok(record)
    }

    #[cfg(test)]
    pub(crate) fn install(&self, record: TokenRecord) {
        *self.slot.write() = Some(Arc::new(record));
    }
}
