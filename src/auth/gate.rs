//! Auth mode gate for protected routes
//!
//! Reads the `authType` selector from the query string or request body,
//! obtains a valid token from the matching flow and attaches it to the
//! request as a [`ResolvedToken`].

use super::{AppTokenCache, ThreeLeggedFlow};
use crate::constants::{AUTH_TYPE_FIELD, MAX_GATE_BODY_BYTES};
use crate::http::AppError;
use crate::http::session::Session;
use crate::model::{AuthMode, TokenRecord};
use crate::{BrokerError, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;

/// A valid token for the mode the request asked for
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub mode: AuthMode,
    pub record: Arc<TokenRecord>,
}

/// Dispatches token acquisition to the 2-legged cache or the 3-legged flow
#[derive(Clone)]
pub struct AuthGate {
    app_tokens: Arc<AppTokenCache>,
    flow: ThreeLeggedFlow,
}

impl AuthGate {
    pub fn new(app_tokens: Arc<AppTokenCache>, flow: ThreeLeggedFlow) -> Self {
        Self { app_tokens, flow }
    }

    pub fn app_tokens(&self) -> &Arc<AppTokenCache> {
        &self.app_tokens
    }

    pub fn flow(&self) -> &ThreeLeggedFlow {
        &self.flow
    }

    /// Obtain a valid token for `mode`
    ///
    /// 3-legged failures surface as `Unauthenticated`; 2-legged failures as
    /// provider errors.
    pub async fn resolve(&self, mode: AuthMode, session: &Session) -> Result<ResolvedToken> {
        let record = match mode {
            AuthMode::TwoLegged => self.app_tokens.get_valid_app_token().await?,
            AuthMode::ThreeLegged => Arc::new(self.flow.ensure_valid(session).await?),
        };

        Ok(ResolvedToken { mode, record })
    }
}

/// Middleware resolving the request's auth mode into a [`ResolvedToken`]
pub async fn auth_gate_middleware(
    State(gate): State<AuthGate>,
    session: Session,
    req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let (mut req, selector) = read_selector(req).await?;
    let mode = AuthMode::from_selector(selector.as_deref())?;

    let resolved = gate.resolve(mode, &session).await?;
    tracing::debug!(mode = %mode, path = %req.uri().path(), "Request authorized");

    req.extensions_mut().insert(resolved);
    Ok(next.run(req).await)
}

/// Find `authType` in the query string, then in a JSON or form body
///
/// A buffered body is put back so the handler can still read it.
pub(crate) async fn read_selector(req: Request) -> Result<(Request, Option<String>)> {
    if let Some(selector) = req.uri().query().and_then(selector_from_form) {
        return Ok((req, Some(selector)));
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let is_json = content_type.starts_with("application/json");
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");
    if !is_json && !is_form {
        return Ok((req, None));
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_GATE_BODY_BYTES)
        .await
        .map_err(|e| BrokerError::caller_contract(format!("Unreadable request body: {}", e)))?;

    let selector = if is_json {
        selector_from_json(&bytes)?
    } else {
        std::str::from_utf8(&bytes).ok().and_then(selector_from_form)
    };

    Ok((Request::from_parts(parts, Body::from(bytes)), selector))
}

fn selector_from_form(encoded: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .find(|(k, _)| k == AUTH_TYPE_FIELD)
        .map(|(_, v)| v.into_owned())
}

fn selector_from_json(bytes: &[u8]) -> Result<Option<String>> {
    // Malformed JSON is the handler's problem, not the gate's
    let Ok(body) = serde_json::from_slice::<Value>(bytes) else {
        return Ok(None);
    };

    match body.get(AUTH_TYPE_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(BrokerError::caller_contract(format!(
            "{} must be a string, got {}",
            AUTH_TYPE_FIELD, other
        ))),
    }
}
