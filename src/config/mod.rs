//! Configuration management for the broker
//!
//! Loads configuration from `broker.config.json` (or YAML), overlays the
//! environment variables the APS app has always used, then validates.

use crate::constants::*;
use crate::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;

/// Complete broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Identity provider and resource API settings (required)
    pub provider: ProviderConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

/// Identity provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Authorization endpoint
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Base URL of the resource API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Callback URL registered with the provider
    #[serde(default)]
    pub redirect_uri: String,

    /// Space separated scopes for the 3-legged flow
    #[serde(default)]
    pub scopes: String,

    /// Space separated scopes for the 2-legged flow
    #[serde(default = "default_two_legged_scopes")]
    pub two_legged_scopes: String,

    /// APS account whose users are listed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Timeout applied to every outbound call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("two_legged_scopes", &self.two_legged_scopes)
            .field("account_id", &self.account_id)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl ProviderConfig {
    /// 3-legged scopes as a list
    pub fn scope_list(&self) -> Vec<String> {
        split_scopes(&self.scopes)
    }

    /// 2-legged scopes as a list
    pub fn two_legged_scope_list(&self) -> Vec<String> {
        split_scopes(&self.two_legged_scopes)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            redirect_uri: String::new(),
            scopes: String::new(),
            two_legged_scopes: default_two_legged_scopes(),
            account_id: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable secure cookies (requires HTTPS). Default: false for local development
    #[serde(default)]
    pub secure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Session lifetime, refreshed cookies expire with it
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_session_ttl_hours(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_auth_url() -> String {
    APS_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    APS_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    APS_API_BASE_URL.to_string()
}

fn default_two_legged_scopes() -> String {
    DEFAULT_TWO_LEGGED_SCOPES.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_session_ttl_hours() -> i64 {
    DEFAULT_SESSION_TTL_HOURS
}

fn split_scopes(scopes: &str) -> Vec<String> {
    scopes.split_whitespace().map(String::from).collect()
}

impl Config {
    /// Load configuration from the default file plus environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(CONFIG_FILE_NAME)
    }

    /// Load configuration from a specific path, overlay environment, validate
    ///
    /// A missing file is not an error: the environment alone may configure
    /// the broker.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::read_file(path.as_ref())?;
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without touching the environment
    ///
    /// Supports both JSON and YAML formats based on file extension:
    /// - `.yaml` or `.yml` files are parsed as YAML
    /// - anything else is parsed as JSON
    pub fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                BrokerError::config(format!("Failed to parse YAML config: {}", e))
            })?,
            _ => serde_json::from_str(&content).map_err(|e| {
                BrokerError::config(format!("Failed to parse JSON config: {}", e))
            })?,
        };

        Ok(config)
    }

    /// Overlay environment variables on top of file values
    ///
    /// `lookup` abstracts `std::env::var` so tests need not mutate the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = &mut self.provider;

        if let Some(v) = lookup(ENV_CLIENT_ID) {
            provider.client_id = v;
        }
        if let Some(v) = lookup(ENV_CLIENT_SECRET) {
            provider.client_secret = v;
        }
        if let Some(v) = lookup(ENV_REDIRECT_URI) {
            provider.redirect_uri = v;
        }
        if let Some(v) = lookup(ENV_SCOPES) {
            provider.scopes = v;
        }
        if let Some(v) = lookup(ENV_TWO_LEGGED_SCOPES) {
            provider.two_legged_scopes = v;
        }
        if let Some(v) = lookup(ENV_ACCOUNT_ID) {
            provider.account_id = Some(v);
        }

        if let Some(port) = lookup(ENV_PORT).and_then(|p| p.parse().ok()) {
            self.http.port = port;
        }
        if lookup(ENV_NODE_ENV).as_deref() == Some("production") {
            self.http.secure = true;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let provider = &self.provider;

        if provider.client_id.is_empty() {
            return Err(BrokerError::config(format!(
                "provider.clientId is required (or set {})",
                ENV_CLIENT_ID
            )));
        }

        if provider.client_secret.is_empty() {
            return Err(BrokerError::config(format!(
                "provider.clientSecret is required (or set {})",
                ENV_CLIENT_SECRET
            )));
        }

        if provider.redirect_uri.is_empty() {
            return Err(BrokerError::config(format!(
                "provider.redirectUri is required (or set {})",
                ENV_REDIRECT_URI
            )));
        }

        for (name, value) in [
            ("provider.authUrl", &provider.auth_url),
            ("provider.tokenUrl", &provider.token_url),
            ("provider.apiBaseUrl", &provider.api_base_url),
            ("provider.redirectUri", &provider.redirect_uri),
        ] {
            url::Url::parse(value)
                .map_err(|e| BrokerError::config(format!("Invalid {} '{}': {}", name, value, e)))?;
        }

        if provider.timeout_ms == 0 {
            return Err(BrokerError::config(
                "provider.timeoutMs must be greater than 0",
            ));
        }

        if provider.two_legged_scope_list().is_empty() {
            return Err(BrokerError::config(
                "provider.twoLeggedScopes cannot be empty",
            ));
        }

        if self.http.port == 0 {
            return Err(BrokerError::config("http.port must be nonzero (1-65535)"));
        }

        if self.http.host.is_empty() {
            return Err(BrokerError::config("http.host cannot be empty"));
        }

        if self.session.ttl_hours <= 0 {
            return Err(BrokerError::config(
                "session.ttlHours must be greater than 0",
            ));
        }

        if self.session.ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(BrokerError::config(format!(
                "session.ttlHours must be at most {}",
                MAX_SESSION_TTL_HOURS
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            http: HttpConfig::default(),
            session: SessionConfig::default(),
            log: Some(LogConfig {
                level: Some("info".to_string()),
            }),
        }
    }
}
