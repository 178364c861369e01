//! Token endpoint client
//!
//! Exchanges grants for tokens at the APS token endpoint. Every flow in the
//! broker goes through [`TokenRequester::request_token`]; it holds no state
//! beyond the immutable client configuration.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::model::TokenRecord;
use crate::{BrokerError, Result, telemetry};
use chrono::Utc;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicErrorResponse, BasicTokenResponse},
};
use url::Url;

/// oauth2 client with the authorization and token endpoints configured
type ProviderClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

type TokenError = RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>;

/// Grant presented to the token endpoint
#[derive(Clone)]
pub enum Grant {
    /// Authorization code from the 3-legged callback
    AuthorizationCode { code: String },
    /// Refresh token from a stored 3-legged record
    RefreshToken { refresh_token: String },
    /// Application-only access for the given scopes
    ClientCredentials { scopes: Vec<String> },
}

impl Grant {
    /// The `grant_type` form value
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
            Grant::ClientCredentials { .. } => "client_credentials",
        }
    }
}

/// Client for the provider's token and authorization endpoints
///
/// Authenticates with HTTP Basic built from the client id and secret; the
/// secret is never placed in a request body or log line.
#[derive(Clone)]
pub struct TokenRequester {
    client: ProviderClient,
    http_client: reqwest::Client,
}

impl TokenRequester {
    /// Create a requester from provider configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http_client = crate::utils::build_http_client(config.timeout())?;
        Self::with_http_client(config, http_client)
    }

    /// Create a requester that sends through an existing HTTP client
    pub fn with_http_client(config: &ProviderConfig, http_client: reqwest::Client) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| BrokerError::config(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| BrokerError::config(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_uri.clone())
                    .map_err(|e| BrokerError::config(format!("Invalid redirect URI: {}", e)))?,
            );

        Ok(Self {
            client,
            http_client,
        })
    }

    /// Authorization endpoint URL carrying `response_type=code`, the client
    /// id, redirect URI, scopes and `state`
    pub fn authorize_url(&self, scopes: &[String], state: String) -> Url {
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .url();
        url
    }

    /// Exchange a grant for a token
    ///
    /// `expires_at` is computed from the moment the response is received.
    /// Failures are returned as-is; retry policy belongs to the caller.
    pub async fn request_token(&self, grant: Grant) -> std::result::Result<TokenRecord, ProviderError> {
        let grant_type = grant.grant_type();

        let result = match &grant {
            Grant::AuthorizationCode { code } => {
                self.client
                    .exchange_code(AuthorizationCode::new(code.clone()))
                    .request_async(&self.http_client)
                    .await
            }
            Grant::RefreshToken { refresh_token } => {
                self.client
                    .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
                    .request_async(&self.http_client)
                    .await
            }
            Grant::ClientCredentials { scopes } => {
                self.client
                    .exchange_client_credentials()
                    .add_scopes(scopes.iter().cloned().map(Scope::new))
                    .request_async(&self.http_client)
                    .await
            }
        };

        let outcome = result
            .map_err(provider_error)
            .and_then(|response| into_record(response, &grant));

        match &outcome {
            Ok(_) => {
                telemetry::record_token_request(grant_type, "success");
                tracing::debug!(grant = grant_type, "Token request succeeded");
            }
            Err(e) => {
                telemetry::record_token_request(grant_type, "failure");
                tracing::warn!(
                    grant = grant_type,
                    error = %e,
                    payload = ?e.payload,
                    "Token request failed"
                );
            }
        }

        outcome
    }
}

fn into_record(
    response: BasicTokenResponse,
    grant: &Grant,
) -> std::result::Result<TokenRecord, ProviderError> {
    let received_at = Utc::now();

    let expires_in = response
        .expires_in()
        .ok_or_else(|| ProviderError::transport("Token response is missing expires_in"))?;

    if expires_in.is_zero() {
        return Err(ProviderError::transport(
            "Token response reported a zero lifetime",
        ));
    }

    // Providers may omit a rotated refresh token; keep the one we presented
    let refresh_token = response
        .refresh_token()
        .map(|t| t.secret().clone())
        .or_else(|| match grant {
            Grant::RefreshToken { refresh_token } => Some(refresh_token.clone()),
            _ => None,
        });

    TokenRecord::issued(
        response.access_token().secret().clone(),
        refresh_token,
        expires_in,
        received_at,
    )
    .ok_or_else(|| ProviderError::transport("Token response reported an out-of-range lifetime"))
}

fn provider_error(err: TokenError) -> ProviderError {
    match err {
        RequestTokenError::ServerResponse(body) => {
            let payload = serde_json::to_value(&body).ok();
            let message = match body.error_description() {
                Some(description) => format!("Token request rejected: {}", description),
                None => format!("Token request rejected: {}", body.error()),
            };
            ProviderError::upstream(message, None, payload)
        }
        RequestTokenError::Request(HttpClientError::Reqwest(e)) if e.is_timeout() => {
            ProviderError::transport("Token request timed out")
        }
        RequestTokenError::Request(e) => {
            ProviderError::transport(format!("Token request failed: {}", e))
        }
        RequestTokenError::Parse(e, body) => {
            let payload = serde_json::from_slice(&body).ok();
            ProviderError::upstream(
                format!("Failed to parse token response: {}", e),
                None,
                payload,
            )
        }
        RequestTokenError::Other(msg) => {
            ProviderError::transport(format!("Token request failed: {}", msg))
        }
    }
}
