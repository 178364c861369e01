//! Session management for the 3-legged flow
//!
//! The flow controller only sees the [`SessionStore`] capability through a
//! [`Session`] handle. The in-memory store and cookie middleware here are the
//! transport used by the HTTP server.

use crate::constants::{SESSION_CLEANUP_INTERVAL_SECS, SESSION_COOKIE};
use crate::{BrokerError, Result};
use async_trait::async_trait;
use axum::http::request::Parts;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-user key-value storage with server-controlled lifetime
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a value; `None` when the key or the session is absent/expired
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>>;

    /// Write a value, creating the session if needed
    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()>;

    /// Remove a single key
    async fn clear(&self, session_id: &str, key: &str) -> Result<()>;

    /// Remove the whole session
    async fn destroy(&self, session_id: &str) -> Result<()>;

    /// Expiry of a live session, `None` when it does not exist
    async fn expires_at(&self, session_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Handle binding one session id to its store
#[derive(Clone)]
pub struct Session {
    id: String,
    store: Arc<dyn SessionStore>,
}

impl Session {
    pub fn new(id: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read and deserialize a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(&self.id, key).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                BrokerError::session(format!("Corrupt session value for '{}': {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// Serialize and write a value
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store.set(&self.id, key, value).await
    }

    pub async fn clear(&self, key: &str) -> Result<()> {
        self.store.clear(&self.id, key).await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.store.destroy(&self.id).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    expires_at: DateTime<Utc>,
    data: HashMap<String, Value>,
}

/// In-memory session store with a fixed TTL per session
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// Create a new session store
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Spawn the periodic sweep of expired sessions
    pub fn start_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(
                    SESSION_CLEANUP_INTERVAL_SECS,
                ))
                .await;
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Purged expired sessions");
                }
            }
        })
    }

    /// Drop every expired session, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| now < entry.expires_at);
        before - sessions.len()
    }

    /// Number of sessions currently held, expired ones included
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn expire_now(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.expires_at = Utc::now() - Duration::seconds(1);
        }
    }

    fn live_entry<R>(&self, session_id: &str, f: impl FnOnce(&SessionEntry) -> R) -> Option<R> {
        let now = Utc::now();
        let sessions = self.sessions.read();
        let entry = sessions.get(session_id)?;

        if now >= entry.expires_at {
            drop(sessions);
            self.remove_if_expired(session_id, now);
            return None;
        }

        Some(f(entry))
    }

    /// Remove the session if it is still expired as of `now`
    ///
    /// Checked again under the write lock: a concurrent `set` may have
    /// revived the session after the read lock was released.
    pub(crate) fn remove_if_expired(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(session_id) {
            Some(entry) if now >= entry.expires_at => {
                sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .live_entry(session_id, |entry| entry.data.get(key).cloned())
            .flatten())
    }

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                expires_at: now + self.ttl,
                data: HashMap::new(),
            });

        // An expired session is never revived with its old data
        if now >= entry.expires_at {
            entry.expires_at = now + self.ttl;
            entry.data.clear();
        }

        entry.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, session_id: &str, key: &str) -> Result<()> {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.data.remove(key);
        }
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }

    async fn expires_at(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.live_entry(session_id, |entry| entry.expires_at))
    }
}

/// State for [`session_middleware`]
#[derive(Clone)]
pub struct SessionLayerState {
    pub store: Arc<dyn SessionStore>,
    /// Set the Secure cookie flag (HTTPS deployments)
    pub secure: bool,
}

/// Session middleware that attaches a [`Session`] to every request
///
/// Requests without a live session cookie get a fresh id. The cookie is only
/// issued once something was stored in that session, and cleared when the
/// handler destroyed the session.
pub async fn session_middleware(
    State(state): State<SessionLayerState>,
    mut req: Request,
    next: Next,
) -> Response {
    let presented = session_id_from_headers(req.headers());

    let existing = match &presented {
        Some(id) => match state.store.expires_at(id).await {
            Ok(Some(_)) => Some(id.clone()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Session lookup failed: {}", e);
                None
            }
        },
        None => None,
    };

    let is_new = existing.is_none();
    let session_id = existing.unwrap_or_else(crate::utils::random_token);
    req.extensions_mut()
        .insert(Session::new(session_id.clone(), state.store.clone()));

    let mut response = next.run(req).await;

    let expires_at = state.store.expires_at(&session_id).await.unwrap_or_else(|e| {
        tracing::warn!("Session lookup failed: {}", e);
        None
    });

    let cookie = match (is_new, expires_at) {
        (true, Some(expires_at)) => Some(set_session_cookie(&session_id, expires_at, state.secure)),
        (false, None) => Some(clear_session_cookie(state.secure)),
        // Stale cookie for a session we never knew about
        (true, None) if presented.is_some() => Some(clear_session_cookie(state.secure)),
        _ => None,
    };

    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    response
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Session not available in request extensions",
        ))
    }
}

/// Extract the session id from the Cookie header
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let prefix = format!("{}=", SESSION_COOKIE);
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|c| c.trim())
        .find_map(|c| c.strip_prefix(prefix.as_str()))
        .filter(|id| !id.is_empty())
        .map(|s| s.to_string())
}

/// Set a session cookie in the response with security flags
///
/// The `secure` parameter controls whether to set the Secure flag (requires HTTPS).
pub fn set_session_cookie(session_id: &str, expires_at: DateTime<Utc>, secure: bool) -> String {
    let secure_flag = if secure { " Secure;" } else { "" };
    format!(
        "{}={}; Path=/; Expires={}; HttpOnly;{} SameSite=Lax",
        SESSION_COOKIE,
        session_id,
        expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
        secure_flag
    )
}

/// Clear the session cookie with security flags
pub fn clear_session_cookie(secure: bool) -> String {
    let secure_flag = if secure { " Secure;" } else { "" };
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly;{} SameSite=Lax",
        SESSION_COOKIE, secure_flag
    )
}
