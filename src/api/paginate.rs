//! Offset/limit pagination over APS collection endpoints
//!
//! Requests `offset=0,page_size,2*page_size,...` until the provider returns an
//! empty page. Termination relies on the provider eventually doing so; there
//! is no page cap.

use crate::constants::MAX_PAGE_SIZE;
use crate::error::ProviderError;
use crate::model::TokenRecord;
use crate::{BrokerError, Result, telemetry};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

/// A page body: either a bare array or an object wrapping `results`
#[derive(Deserialize)]
#[serde(untagged)]
enum Page<T> {
    Bare(Vec<T>),
    Wrapped { results: Vec<T> },
}

impl<T> Page<T> {
    fn into_records(self) -> Vec<T> {
        match self {
            Page::Bare(records) => records,
            Page::Wrapped { results } => results,
        }
    }
}

/// Fetch every record of a collection endpoint
///
/// Any page failure aborts the whole fetch; records accumulated so far are
/// dropped. `page_size` must be within `1..=100`.
pub async fn fetch_all<T: DeserializeOwned>(
    http_client: &reqwest::Client,
    endpoint: &str,
    token: &TokenRecord,
    page_size: u32,
) -> Result<Vec<T>> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(BrokerError::caller_contract(format!(
            "Page size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, page_size
        )));
    }

    let base = Url::parse(endpoint).map_err(|e| {
        BrokerError::caller_contract(format!("Invalid endpoint '{}': {}", endpoint, e))
    })?;

    let mut records = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let page: Vec<T> = fetch_page(http_client, &base, token, offset, page_size).await?;
        telemetry::record_page_fetched();

        if page.is_empty() {
            break;
        }

        tracing::debug!(offset, count = page.len(), "Fetched page");
        records.extend(page);
        offset += u64::from(page_size);
    }

    tracing::info!(endpoint = %base.path(), total = records.len(), "Collection fetched");
    Ok(records)
}

async fn fetch_page<T: DeserializeOwned>(
    http_client: &reqwest::Client,
    base: &Url,
    token: &TokenRecord,
    offset: u64,
    limit: u32,
) -> std::result::Result<Vec<T>, ProviderError> {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("offset", &offset.to_string())
        .append_pair("limit", &limit.to_string());

    let response = http_client
        .get(url)
        .bearer_auth(&token.access_token)
        .send()
        .await?;

    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let payload = serde_json::from_slice::<Value>(&body)
            .ok()
            .or_else(|| {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                (!text.is_empty()).then_some(Value::String(text))
            });
        return Err(ProviderError::upstream(
            format!(
                "Resource request failed at offset {} with status {}",
                offset,
                status.as_u16()
            ),
            Some(status.as_u16()),
            payload,
        ));
    }

    serde_json::from_slice::<Page<T>>(&body)
        .map(Page::into_records)
        .map_err(|e| {
            ProviderError::upstream(
                format!("Unexpected page body at offset {}: {}", offset, e),
                Some(status.as_u16()),
                None,
            )
        })
}
