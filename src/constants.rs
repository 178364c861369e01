//! Constants used throughout the broker
//!
//! Provider endpoints, session keys, environment variable names and the
//! numeric limits of the token lifecycle.

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "broker.config.json";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default HTTP host
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default session lifetime in hours
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Upper bound for the configured session lifetime (one year)
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Default timeout for outbound calls in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// PROVIDER
// ============================================================================

/// APS authorization endpoint
pub const APS_AUTH_URL: &str = "https://developer.api.autodesk.com/authentication/v2/authorize";

/// APS token endpoint
pub const APS_TOKEN_URL: &str = "https://developer.api.autodesk.com/authentication/v2/token";

/// APS resource API base URL
pub const APS_API_BASE_URL: &str = "https://developer.api.autodesk.com";

/// Scope requested for the client-credentials grant when none is configured
pub const DEFAULT_TWO_LEGGED_SCOPES: &str = "data:read";

/// Proactive refresh window before a 3-legged token expires (5 minutes)
pub const REFRESH_MARGIN_MS: i64 = 300_000;

/// Largest page the APS collection endpoints accept
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Random bytes in an authorization state value (hex encoded to 32 chars)
pub const AUTH_STATE_BYTES: usize = 16;

// ============================================================================
// SESSION
// ============================================================================

/// Session cookie name
pub const SESSION_COOKIE: &str = "aps_session";

/// Session key holding the pending authorization state
pub const SESSION_KEY_AUTH_STATE: &str = "authState";

/// Session key holding the user's token record
pub const SESSION_KEY_TOKEN_INFO: &str = "tokenInfo";

/// Interval between expired-session sweeps, in seconds
pub const SESSION_CLEANUP_INTERVAL_SECS: u64 = 300;

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_CLIENT_ID: &str = "AUTODESK_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AUTODESK_CLIENT_SECRET";
pub const ENV_REDIRECT_URI: &str = "REDIRECT_URI";
pub const ENV_SCOPES: &str = "SCOPES";
pub const ENV_TWO_LEGGED_SCOPES: &str = "TWO_LEGGED_SCOPES";
pub const ENV_ACCOUNT_ID: &str = "ACCOUNT_ID";
pub const ENV_PORT: &str = "PORT";

/// `production` enables secure cookies
pub const ENV_NODE_ENV: &str = "NODE_ENV";

// ============================================================================
// HTTP
// ============================================================================

/// Query/body field carrying the auth mode selector
pub const AUTH_TYPE_FIELD: &str = "authType";

/// Where unauthenticated 3-legged requests are sent
pub const AUTH_ROUTE: &str = "/auth";

/// Largest request body the auth gate will buffer to read `authType`
pub const MAX_GATE_BODY_BYTES: usize = 64 * 1024;
