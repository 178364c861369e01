//! HTTP server for the APS broker
//!
//! Exposes the 3-legged login routes, the 2-legged token route and the
//! protected API routes that sit behind the auth gate.

pub mod session;

use self::session::{MemorySessionStore, Session, SessionLayerState, session_middleware};
use crate::api::ResourceClient;
use crate::auth::{AuthGate, ResolvedToken, auth_gate_middleware};
use crate::config::Config;
use crate::constants::AUTH_ROUTE;
use crate::error::ProviderError;
use crate::{BrokerError, Result};
use axum::{
    Extension, Router,
    extract::{Json, Query, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gate: AuthGate,
    pub resources: ResourceClient,
}

impl AppState {
    /// Wire the gate and resource client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            gate: crate::auth::build_gate(&config.provider)?,
            resources: ResourceClient::new(&config.provider)?,
        })
    }
}

/// Error type for HTTP handlers
#[derive(Debug)]
pub struct AppError(BrokerError);

impl AppError {
    pub fn inner(&self) -> &BrokerError {
        &self.0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message, payload) = match &self.0 {
            BrokerError::Unauthenticated(msg) => {
                tracing::debug!("Redirecting to login: {}", msg);
                return Redirect::to(AUTH_ROUTE).into_response();
            }
            BrokerError::Security(msg) => {
                (StatusCode::FORBIDDEN, "security_error", msg.clone(), None)
            }
            BrokerError::CallerContract(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone(), None)
            }
            BrokerError::Provider(e) => {
                tracing::error!(
                    status = ?e.status,
                    payload = ?e.payload,
                    "Provider error: {}",
                    e.message
                );
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    e.description().to_string(),
                    e.payload.clone(),
                )
            }
            _ => {
                // Log full error details internally
                tracing::error!("Internal error: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        tracing::debug!(
            error_type = error_type,
            status = %status,
            message = %message,
            "HTTP request error response"
        );

        let mut error = json!({
            "type": error_type,
            "message": message,
            "status": status.as_u16(),
        });
        if let Some(payload) = payload {
            error["provider"] = payload;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<BrokerError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

type HandlerResult<T> = std::result::Result<T, AppError>;

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;

    let store = MemorySessionStore::new(config.session.ttl());
    let _cleanup = store.start_cleanup();

    let session_state = SessionLayerState {
        store: Arc::new(store),
        secure: config.http.secure,
    };

    let app = build_router(state, session_state);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| BrokerError::config(format!("Invalid address {}: {}", addr, e)))?;

    tracing::info!("Starting HTTP server on http://{}", socket_addr);

    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BrokerError::config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Build the router with all endpoints
pub fn build_router(state: AppState, session_state: SessionLayerState) -> Router {
    // Routes that need a token resolved for the requested auth mode
    let gated_routes = Router::new()
        .route("/api/test", get(test_token_handler).post(test_token_handler))
        .route("/api/users/acc", get(account_users_handler))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            auth_gate_middleware,
        ));

    Router::new()
        .route("/", get(landing_handler))
        .route(AUTH_ROUTE, get(auth_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", get(logout_handler))
        .route("/api/token/2legged", get(app_token_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(gated_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new())
                        .on_response(
                            DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                )
                .layer(middleware::from_fn_with_state(
                    session_state,
                    session_middleware,
                )),
        )
}

// ============================================================================
// LOGIN FLOW HANDLERS
// ============================================================================

async fn landing_handler() -> Html<&'static str> {
    Html(
        r#"<h1>Autodesk Platform Services Auth</h1>
<p>Welcome to the authentication broker.</p>
<a href="/auth">Sign in with Autodesk</a>"#,
    )
}

async fn auth_handler(State(state): State<AppState>, session: Session) -> HandlerResult<Redirect> {
    let url = state.gate.flow().initiate(&session).await?;
    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback_handler(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<CallbackParams>,
) -> HandlerResult<&'static str> {
    // The provider redirects here with `error` when the user denies access
    if let Some(error) = params.error {
        return Err(ProviderError::upstream(
            format!("Authorization was not granted: {}", error),
            None,
            Some(json!({
                "error": error,
                "error_description": params.error_description,
            })),
        )
        .into());
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BrokerError::caller_contract("Missing authorization code"))?;

    state
        .gate
        .flow()
        .handle_callback(&session, &code, params.state.as_deref().unwrap_or_default())
        .await?;

    Ok("Authenticated successfully. You can now use the token.")
}

async fn logout_handler(State(state): State<AppState>, session: Session) -> HandlerResult<&'static str> {
    state.gate.flow().logout(&session).await?;
    Ok("Session closed. Tokens removed.")
}

// ============================================================================
// TOKEN HANDLERS
// ============================================================================

/// Fetch a fresh 2-legged token and report its expiry (never the token)
async fn app_token_handler(State(state): State<AppState>) -> HandlerResult<Json<Value>> {
    let record = state.gate.app_tokens().refresh().await?;
    let status = record.status(Utc::now());

    Ok(Json(json!({
        "message": "2-legged token obtained",
        "expires_at": status.expires_at.to_rfc3339(),
        "remaining_secs": status.remaining_secs,
    })))
}

async fn test_token_handler(Extension(resolved): Extension<ResolvedToken>) -> Json<Value> {
    let status = resolved.record.status(Utc::now());

    Json(json!({
        "message": format!("Token {} valid", resolved.mode.label()),
        "auth_type": resolved.mode,
        "token_info": {
            "expires_at": status.expires_at.to_rfc3339(),
            "remaining_secs": status.remaining_secs,
        }
    }))
}

async fn account_users_handler(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedToken>,
) -> HandlerResult<Json<Value>> {
    let users = state.resources.list_account_users(&resolved.record).await?;

    Ok(Json(json!({
        "count": users.len(),
        "users": users,
    })))
}

// ============================================================================
// SYSTEM HANDLERS
// ============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> HandlerResult<(StatusCode, String)> {
    let metrics = crate::telemetry::get_metrics()?;
    Ok((StatusCode::OK, metrics))
}
