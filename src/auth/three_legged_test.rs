use super::*;
use crate::http::session::{MemorySessionStore, SessionStore};
use crate::utils::testing::{TOKEN_PATH, provider_config, token_body};
use chrono::Duration;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    flow: ThreeLeggedFlow,
    store: Arc<MemorySessionStore>,
}

impl Fixture {
    fn new(server: &MockServer) -> Self {
        let config = provider_config(&server.uri());
        let requester = Arc::new(TokenRequester::new(&config).unwrap());
        Self {
            flow: ThreeLeggedFlow::new(requester, config.scope_list()),
            store: Arc::new(MemorySessionStore::new(Duration::hours(24))),
        }
    }

    fn session(&self, id: &str) -> Session {
        Session::new(id, self.store.clone())
    }
}

fn state_from(url: &Url) -> String {
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state parameter")
}

async fn mount_code_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("user-access", Some("user-refresh"), 3599)),
        )
        .mount(server)
        .await;
}

fn record_expiring_in(minutes: i64, refresh_token: Option<&str>) -> TokenRecord {
    TokenRecord {
        access_token: "old-access".to_string(),
        refresh_token: refresh_token.map(String::from),
        expires_at: Utc::now() + Duration::minutes(minutes),
    }
}

#[tokio::test]
async fn test_initiate_stores_hex_state_and_builds_redirect() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let url = fx.flow.initiate(&session).await.unwrap();
    let state = state_from(&url);

    assert_eq!(state.len(), 32);
    assert!(state.chars().all(|c| c.is_ascii_hexdigit()));

    let stored: Option<String> = session.get(SESSION_KEY_AUTH_STATE).await.unwrap();
    assert_eq!(stored.as_deref(), Some(state.as_str()));

    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query.get("response_type").map(String::as_str), Some("code"));
    assert_eq!(query.get("scope").map(String::as_str), Some("data:read data:write"));
}

#[tokio::test]
async fn test_callback_with_matching_state_authenticates() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let state = state_from(&fx.flow.initiate(&session).await.unwrap());
    let record = fx
        .flow
        .handle_callback(&session, "the-code", &state)
        .await
        .unwrap();

    assert_eq!(record.access_token, "user-access");
    assert_eq!(record.refresh_token.as_deref(), Some("user-refresh"));

    let stored: Option<TokenRecord> = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap();
    assert_eq!(stored.unwrap(), record);
    let pending: Option<String> = session.get(SESSION_KEY_AUTH_STATE).await.unwrap();
    assert!(pending.is_none());
}

#[tokio::test]
async fn test_callback_with_wrong_state_is_security_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", Some("y"), 3599)))
        .expect(0)
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    fx.flow.initiate(&session).await.unwrap();
    let err = fx
        .flow
        .handle_callback(&session, "code", "forged-state")
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Security(_)));

    // Mismatch still consumes the pending state
    let pending: Option<String> = session.get(SESSION_KEY_AUTH_STATE).await.unwrap();
    assert!(pending.is_none());
}

#[tokio::test]
async fn test_callback_without_initiate_is_security_error() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let session = fx.session("fresh");

    let err = fx
        .flow
        .handle_callback(&session, "code", "")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Security(_)));

    let err = fx
        .flow
        .handle_callback(&session, "code", "anything")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Security(_)));
}

#[tokio::test]
async fn test_state_is_single_use() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let state = state_from(&fx.flow.initiate(&session).await.unwrap());
    fx.flow
        .handle_callback(&session, "code", &state)
        .await
        .unwrap();

    let err = fx
        .flow
        .handle_callback(&session, "code", &state)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Security(_)));
}

#[tokio::test]
async fn test_state_from_older_initiate_is_rejected() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let first = state_from(&fx.flow.initiate(&session).await.unwrap());
    let _second = fx.flow.initiate(&session).await.unwrap();

    let err = fx
        .flow
        .handle_callback(&session, "code", &first)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Security(_)));
}

#[tokio::test]
async fn test_state_is_bound_to_its_session() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    let fx = Fixture::new(&server);

    let state = state_from(&fx.flow.initiate(&fx.session("victim")).await.unwrap());
    let err = fx
        .flow
        .handle_callback(&fx.session("attacker"), "code", &state)
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Security(_)));
}

#[tokio::test]
async fn test_callback_provider_failure_resets_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code already used"
        })))
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let state = state_from(&fx.flow.initiate(&session).await.unwrap());
    let err = fx
        .flow
        .handle_callback(&session, "used-code", &state)
        .await
        .unwrap_err();

    match err {
        BrokerError::Provider(e) => assert_eq!(e.description(), "code already used"),
        other => panic!("expected provider error, got {:?}", other),
    }

    let pending: Option<String> = session.get(SESSION_KEY_AUTH_STATE).await.unwrap();
    let token: Option<TokenRecord> = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap();
    assert!(pending.is_none());
    assert!(token.is_none());
}

#[tokio::test]
async fn test_ensure_valid_without_token_is_unauthenticated() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);

    let err = fx.flow.ensure_valid(&fx.session("s1")).await.unwrap_err();
    assert!(err.is_unauthenticated());
}

#[tokio::test]
async fn test_ensure_valid_returns_fresh_token_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", None, 3599)))
        .expect(0)
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let record = record_expiring_in(30, Some("r"));
    session.set(SESSION_KEY_TOKEN_INFO, &record).await.unwrap();

    assert_eq!(fx.flow.ensure_valid(&session).await.unwrap(), record);
}

#[tokio::test]
async fn test_ensure_valid_refreshes_inside_margin() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("new-access", Some("r-2"), 3599)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    // Four minutes left: not expired, but inside the 5 minute margin
    session
        .set(SESSION_KEY_TOKEN_INFO, &record_expiring_in(4, Some("r-1")))
        .await
        .unwrap();

    let record = fx.flow.ensure_valid(&session).await.unwrap();
    assert_eq!(record.access_token, "new-access");
    assert!(record.expires_at - Utc::now() >= Duration::minutes(5));

    let stored: TokenRecord = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_short_lived_refresh_is_returned_as_issued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("brief-access", Some("r-2"), 60)),
        )
        .expect(2)
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    session
        .set(SESSION_KEY_TOKEN_INFO, &record_expiring_in(4, Some("r-1")))
        .await
        .unwrap();

    // Still inside the margin after refreshing, but handed out unchanged
    let record = fx.flow.ensure_valid(&session).await.unwrap();
    assert_eq!(record.access_token, "brief-access");
    assert!(record.needs_refresh_at(Utc::now()));
    assert!(!record.is_expired_at(Utc::now()));

    let stored: TokenRecord = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap().unwrap();
    assert_eq!(stored, record);

    // The next call refreshes again
    fx.flow.ensure_valid(&session).await.unwrap();
}

#[tokio::test]
async fn test_failed_refresh_logs_session_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    session
        .set(SESSION_KEY_TOKEN_INFO, &record_expiring_in(-10, Some("revoked")))
        .await
        .unwrap();

    let err = fx.flow.ensure_valid(&session).await.unwrap_err();
    assert!(err.is_unauthenticated());

    let stored: Option<TokenRecord> = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap();
    assert!(stored.is_none());

    // Stays logged out rather than returning the stale record
    assert!(fx.flow.ensure_valid(&session).await.unwrap_err().is_unauthenticated());
}

#[tokio::test]
async fn test_expiring_token_without_refresh_token_is_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", None, 3599)))
        .expect(0)
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    session
        .set(SESSION_KEY_TOKEN_INFO, &record_expiring_in(1, None))
        .await
        .unwrap();

    assert!(fx.flow.ensure_valid(&session).await.unwrap_err().is_unauthenticated());
}

#[tokio::test]
async fn test_concurrent_refreshes_last_write_wins() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("refreshed", Some("r-2"), 3599))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .mount(&server)
        .await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    session
        .set(SESSION_KEY_TOKEN_INFO, &record_expiring_in(2, Some("r-1")))
        .await
        .unwrap();

    let (a, b) = tokio::join!(fx.flow.ensure_valid(&session), fx.flow.ensure_valid(&session));
    let (a, b) = (a.unwrap(), b.unwrap());

    // No per-session lock: both requests refreshed
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let stored: TokenRecord = session.get(SESSION_KEY_TOKEN_INFO).await.unwrap().unwrap();
    assert!(stored == a || stored == b);
    assert_eq!(stored.access_token, "refreshed");
}

#[tokio::test]
async fn test_logout_then_ensure_valid_is_unauthenticated() {
    let server = MockServer::start().await;
    mount_code_exchange(&server).await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let state = state_from(&fx.flow.initiate(&session).await.unwrap());
    fx.flow
        .handle_callback(&session, "code", &state)
        .await
        .unwrap();
    assert!(fx.flow.ensure_valid(&session).await.is_ok());

    fx.flow.logout(&session).await.unwrap();
    assert!(fx.flow.ensure_valid(&session).await.unwrap_err().is_unauthenticated());
    assert!(fx.store.expires_at("s1").await.unwrap().is_none());

    // Idempotent
    fx.flow.logout(&session).await.unwrap();
}

#[tokio::test]
async fn test_logout_clears_pending_state() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let session = fx.session("s1");

    let state = state_from(&fx.flow.initiate(&session).await.unwrap());
    fx.flow.logout(&session).await.unwrap();

    let err = fx
        .flow
        .handle_callback(&session, "code", &state)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Security(_)));
}
