//! Telemetry module for the broker
//!
//! Prometheus counters for token acquisition, cache behavior and paging.

use crate::{BrokerError, Result};
use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, IntCounter, TextEncoder, register_counter_vec, register_int_counter};

/// Token endpoint requests by grant type and outcome
static TOKEN_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aps_broker_token_requests_total",
        "Total number of token endpoint requests",
        &["grant", "outcome"]
    )
    .unwrap()
});

/// App token cache lookups by result
static APP_TOKEN_CACHE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aps_broker_app_token_cache_total",
        "App token cache lookups",
        &["result"]
    )
    .unwrap()
});

/// Session refreshes by outcome
static SESSION_REFRESHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aps_broker_session_refreshes_total",
        "3-legged token refreshes",
        &["outcome"]
    )
    .unwrap()
});

/// Pages fetched from collection endpoints
static PAGES_FETCHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aps_broker_pages_fetched_total",
        "Pages fetched from paginated collection endpoints"
    )
    .unwrap()
});

/// Record a token endpoint request
pub fn record_token_request(grant: &str, outcome: &str) {
    TOKEN_REQUESTS_TOTAL
        .with_label_values(&[grant, outcome])
        .inc();
}

/// Record an app token cache lookup (`hit` or `miss`)
pub fn record_app_token_cache(result: &str) {
    APP_TOKEN_CACHE_TOTAL.with_label_values(&[result]).inc();
}

/// Record a 3-legged refresh attempt
pub fn record_session_refresh(outcome: &str) {
    SESSION_REFRESHES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record one fetched page
pub fn record_page_fetched() {
    PAGES_FETCHED_TOTAL.inc();
}

/// Get Prometheus metrics in text format
pub fn get_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BrokerError::config(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| BrokerError::config(format!("Failed to convert metrics to UTF-8: {}", e)))
}
