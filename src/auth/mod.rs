//! OAuth 2.0 token lifecycle for Autodesk Platform Services
//!
//! - **Requester**: exchanges grants at the APS token endpoint
//! - **App token**: process-wide 2-legged (client credentials) cache
//! - **Three-legged**: per-session authorization-code flow with refresh
//! - **Gate**: picks the flow for a request and attaches a valid token

pub mod app_token;
pub mod gate;
pub mod requester;
pub mod three_legged;

pub use app_token::AppTokenCache;
pub use gate::{AuthGate, ResolvedToken, auth_gate_middleware};
pub use requester::{Grant, TokenRequester};
pub use three_legged::ThreeLeggedFlow;

use crate::Result;
use crate::config::ProviderConfig;
use std::sync::Arc;

/// Build the gate and both flows from one provider configuration
///
/// The flows share a single [`TokenRequester`] and its HTTP client.
pub fn build_gate(config: &ProviderConfig) -> Result<AuthGate> {
    let requester = Arc::new(TokenRequester::new(config)?);
    let app_tokens = Arc::new(AppTokenCache::new(
        requester.clone(),
        config.two_legged_scope_list(),
    ));
    let flow = ThreeLeggedFlow::new(requester, config.scope_list());

    Ok(AuthGate::new(app_tokens, flow))
}
