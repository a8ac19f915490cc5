//! Pre-flight / post-flight behavior of the authenticated request client.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sitecheck_core::api::{ApiClient, ApiError};
use sitecheck_core::auth::{AuthError, MemoryTokenStore, TokenManager, TokenStore};
use sitecheck_core::cache::CacheManager;

fn client_for(base_url: &str) -> (Arc<TokenManager>, ApiClient) {
    let store = Arc::new(MemoryTokenStore::new());
    let tokens = Arc::new(TokenManager::new(store, base_url).unwrap());
    let client = ApiClient::new(base_url, tokens.clone()).unwrap();
    (tokens, client)
}

fn grant_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 3600,
        "refresh_expires_in": 2_592_000,
        "token_type": "Bearer"
    })
}

#[tokio::test]
async fn test_login_stores_pair_and_returns_profile() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    let mut body = grant_body("A1", "R1");
    body["user"] = json!({ "id": "7", "username": "inspector1", "license_tier": "pro" });
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = client.session_watch();
    assert!(!*session.borrow());

    let profile = client.login("inspector1", "hunter2").await.unwrap();
    assert_eq!(profile.username, "inspector1");
    assert_eq!(profile.license_display(), "pro");

    assert_eq!(tokens.access_token().unwrap().as_deref(), Some("A1"));
    assert_eq!(tokens.refresh_token().unwrap().as_deref(), Some("R1"));
    assert!(*session.borrow_and_update());
}

#[tokio::test]
async fn test_login_rejection_maps_to_unauthorized() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid credentials" })),
        )
        .mount(&server)
        .await;

    let err = client.login("inspector1", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(tokens.access_token().unwrap().is_none());
}

#[tokio::test]
async fn test_retried_request_carries_rotated_token() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    // T1 looks valid client-side but the server has revoked it.
    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .and(header("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .and(header("Authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("T2", "R2")))
        .expect(1)
        .mount(&server)
        .await;

    let permits = client.list_permits("").await.unwrap();
    assert!(permits.is_empty());
    assert_eq!(tokens.access_token().unwrap().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_at_most_one_retry_on_repeated_401() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    // Two dispatches total: the original and exactly one retry.
    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("T2", "R2")))
        .expect(1)
        .mount(&server)
        .await;

    // The second 401 is handed back to the caller, not escalated to a
    // session teardown.
    let err = client.list_permits("").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(tokens.access_token().unwrap().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_preflight_refresh_failure_never_sends_request() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    // Expired access token forces the pre-flight refresh.
    tokens.store_tokens("T1", "R1", 0, 3600).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = client.session_watch();
    let err = client.list_permits("").await.unwrap_err();
    assert!(err.is_session_expired());
    assert!(tokens.access_token().unwrap().is_none());
    assert!(!*session.borrow_and_update());
}

#[tokio::test]
async fn test_postflight_refresh_failure_tears_down_session() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.list_permits("").await.unwrap_err();
    assert!(err.is_session_expired());
    assert!(tokens.access_token().unwrap().is_none());
    assert!(tokens.refresh_token().unwrap().is_none());
}

#[tokio::test]
async fn test_session_teardown_clears_cached_data() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryTokenStore::new());
    let tokens = Arc::new(TokenManager::new(store, server.uri()).unwrap());
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(CacheManager::new(dir.path().to_path_buf()).unwrap());
    let client = ApiClient::new(server.uri(), tokens.clone())
        .unwrap()
        .with_cache(cache.clone());

    // A login followed by a permit fetch populates both cache files.
    let mut body = grant_body("T1", "R1");
    body["user"] = json!({ "id": "7", "username": "inspector1" });
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .and(header("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "PRM-001",
            "permit_number": "PRM-001",
            "status": "Active"
        }])))
        .mount(&server)
        .await;

    client.login("inspector1", "hunter2").await.unwrap();
    client.list_permits("").await.unwrap();
    assert!(cache.load_permits().unwrap().is_some());
    assert!(cache.load_profile().unwrap().is_some());

    // Server-side invalidation with a dead refresh token expires the
    // session; the cached data must not outlive it.
    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits/PRM-001"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.get_permit("PRM-001").await.unwrap_err();
    assert!(err.is_session_expired());
    assert!(cache.load_permits().unwrap().is_none());
    assert!(cache.load_profile().unwrap().is_none());
}

/// Store whose reads fail, as when the OS keychain is locked.
struct UnreadableStore {
    inner: MemoryTokenStore,
}

impl TokenStore for UnreadableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, AuthError> {
        Err(AuthError::Storage("keychain locked".to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.inner.delete(key)
    }
}

#[tokio::test]
async fn test_logout_survives_unreadable_token_store() {
    let server = MockServer::start().await;
    let store = Arc::new(UnreadableStore {
        inner: MemoryTokenStore::new(),
    });
    let tokens = Arc::new(TokenManager::new(store, server.uri()).unwrap());
    let client = ApiClient::new(server.uri(), tokens).unwrap();

    // No token is readable, so no server-side call is attempted; the local
    // teardown still succeeds.
    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    client.logout().await.unwrap();
}

#[tokio::test]
async fn test_logout_clears_local_session_despite_server_error() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/mobile/auth/logout"))
        .and(header("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    client.logout().await.unwrap();
    assert!(tokens.access_token().unwrap().is_none());
    assert!(tokens.refresh_token().unwrap().is_none());
}

#[tokio::test]
async fn test_non_401_statuses_pass_through() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits/PRM-404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Permit not found"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.get_permit("PRM-404").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    // Business errors never cost the session.
    assert_eq!(tokens.access_token().unwrap().as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_permit_search_sends_query_param() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .and(query_param("search", "PRM-00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "PRM-001",
            "permit_number": "PRM-001",
            "status": "Active"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let permits = client.list_permits("PRM-00").await.unwrap();
    assert_eq!(permits.len(), 1);
    assert_eq!(permits[0].permit_number, "PRM-001");
}

#[tokio::test]
async fn test_caller_headers_survive_bearer_attachment() {
    let server = MockServer::start().await;
    let (tokens, client) = client_for(&server.uri());

    tokens.store_tokens("T1", "R1", 3600, 2_592_000).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/geoprox/permits"))
        .and(header("X-Requested-With", "sitecheck"))
        .and(header("Authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("X-Requested-With", HeaderValue::from_static("sitecheck"));
    // A caller-supplied Authorization value is clobbered by the client.
    headers.insert("Authorization", HeaderValue::from_static("Bearer stale"));

    let response = client
        .fetch(Method::GET, "/api/geoprox/permits", None, None, Some(&headers))
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_session_expired_error_shape() {
    // Sanity-check the synthetic error the UI layer matches on.
    let err: ApiError = AuthError::SessionExpired.into();
    assert!(err.is_session_expired());
}
