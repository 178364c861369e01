//! APS resource API access
//!
//! Calls made with a token resolved by the auth gate. Collection endpoints are
//! read through [`paginate::fetch_all`].

pub mod paginate;

pub use paginate::fetch_all;

use crate::config::ProviderConfig;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::model::{AccountUser, TokenRecord};
use crate::{BrokerError, Result};

/// Client for the APS resource endpoints
#[derive(Clone)]
pub struct ResourceClient {
    http_client: reqwest::Client,
    api_base_url: String,
    account_id: Option<String>,
}

impl ResourceClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http_client = crate::utils::build_http_client(config.timeout())?;
        Ok(Self::with_http_client(config, http_client))
    }

    pub fn with_http_client(config: &ProviderConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
        }
    }

    /// HQ endpoint listing the users of the configured account
    pub fn account_users_endpoint(&self) -> Result<String> {
        let account_id = self
            .account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BrokerError::config("No account id configured (ACCOUNT_ID)"))?;

        Ok(format!(
            "{}/hq/v1/accounts/{}/users",
            self.api_base_url, account_id
        ))
    }

    /// Every user of the configured account, across all pages
    pub async fn list_account_users(&self, token: &TokenRecord) -> Result<Vec<AccountUser>> {
        let endpoint = self.account_users_endpoint()?;
        fetch_all(&self.http_client, &endpoint, token, DEFAULT_PAGE_SIZE).await
    }
}
