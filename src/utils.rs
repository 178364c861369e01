//! Utility functions and helpers
//!
//! Shared HTTP client construction and secure random values.

use crate::{BrokerError, Result};
use rand::RngCore;
use std::time::Duration;

/// Build the outbound HTTP client used for provider and resource calls
///
/// Every request is bounded by `timeout`. Redirects are disabled so an
/// authorization code or bearer token is never forwarded to another host.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| BrokerError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Hex-encoded random value from the thread-local CSPRNG
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// URL-safe random token (session ids)
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Fixtures shared by unit tests
#[cfg(test)]
pub mod testing {
    use crate::config::ProviderConfig;
    use serde_json::{Value, json};

    pub const TEST_CLIENT_ID: &str = "test-client-id";
    pub const TEST_CLIENT_SECRET: &str = "test-client-secret";
    pub const TOKEN_PATH: &str = "/authentication/v2/token";

    /// Provider configuration pointing every endpoint at a mock server
    pub fn provider_config(server_uri: &str) -> ProviderConfig {
        ProviderConfig {
            client_id: TEST_CLIENT_ID.to_string(),
            client_secret: TEST_CLIENT_SECRET.to_string(),
            auth_url: format!("{}/authentication/v2/authorize", server_uri),
            token_url: format!("{}{}", server_uri, TOKEN_PATH),
            api_base_url: server_uri.to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            scopes: "data:read data:write".to_string(),
            two_legged_scopes: "data:read".to_string(),
            account_id: Some("acc-123".to_string()),
            timeout_ms: 2_000,
        }
    }

    /// Successful token endpoint body
    pub fn token_body(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> Value {
        let mut body = json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": expires_in,
        });
        if let Some(refresh) = refresh_token {
            body["refresh_token"] = json!(refresh);
        }
        body
    }

    /// Expected Basic authorization header for the test client
    pub fn basic_auth_header() -> String {
        let raw = format!("{}:{}", TEST_CLIENT_ID, TEST_CLIENT_SECRET);
        format!(
            "Basic {}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, raw)
        )
    }
}
