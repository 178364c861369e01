//! APS Broker - OAuth2 token broker for Autodesk Platform Services
//!
//! Mediates access to the APS APIs on behalf of an application and its users:
//! - 2-legged (client credentials) tokens cached process-wide
//! - 3-legged (authorization code) tokens held per user session, refreshed
//!   shortly before they expire
//! - an auth gate choosing between the two per request
//! - a fetcher that drains offset/limit paginated collection endpoints
//!
//! # Example
//!
//! ```rust,no_run
//! use aps_broker::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let gate = aps_broker::auth::build_gate(&config.provider)?;
//!
//!     let token = gate.app_tokens().get_valid_app_token().await?;
//!     let users = aps_broker::api::ResourceClient::new(&config.provider)?
//!         .list_account_users(&token)
//!         .await?;
//!     println!("{} users", users.len());
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Token lifecycle and resource access
pub mod api;
pub mod auth;

// Infrastructure
pub mod cli;
pub mod config;
pub mod telemetry;

// Interface layer
pub mod http;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use error::{BrokerError, ProviderError, Result};
pub use model::{AccountUser, AuthMode, TokenRecord};

/// Initialize logging for the application
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(log: Option<&config::LogConfig>) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let default_directive = match log.and_then(|l| l.level.as_deref()) {
        Some(level) => format!("aps_broker={}", level),
        None => "aps_broker=info".to_string(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
