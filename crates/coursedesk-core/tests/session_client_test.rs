//! Integration tests for the token-attaching client and its 401 recovery.
//!
//! These tests verify:
//! - The stored access token is attached (or omitted when absent)
//! - Concurrent 401s share a single refresh and retry with the same token
//! - Refresh failure rejects every queued request and clears the session once
//! - A request is retried at most once
//! - A 401 that arrives after a refresh already settled reuses its outcome

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use coursedesk_core::api::Method;
use coursedesk_core::{
    ApiError, ApiRequest, ClientError, LogoutReason, MemoryStore, RefreshError, SessionEvent,
    SessionManager, SessionOptions, StoredSession, TokenStore,
};
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Memory store that counts how often it is cleared
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    clears: AtomicUsize,
}

impl CountingStore {
    fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        Self {
            inner: MemoryStore::with_tokens(access, refresh),
            clears: AtomicUsize::new(0),
        }
    }

    fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl TokenStore for CountingStore {
    fn load(&self) -> Result<StoredSession> {
        self.inner.load()
    }

    fn store(&self, session: &StoredSession) -> Result<()> {
        self.inner.store(session)
    }

    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

async fn setup(store: Arc<CountingStore>) -> (MockServer, Arc<SessionManager>) {
    let server = MockServer::start().await;
    let (manager, _api) = SessionManager::connect(store, SessionOptions::new(server.uri()))
        .expect("Failed to build session manager");
    (server, manager)
}

/// `/courses` answers 200 only to the given token and 401 to everything else
async fn mount_courses_for(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/courses"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "title": "Algebra" }])))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(server)
        .await;
}

fn refresh_ok(delay: Duration) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({ "accessToken": "a2", "refreshToken": "r2" }))
        .set_delay(delay)
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Pass-through
// ============================================================================

#[tokio::test]
async fn test_valid_token_makes_no_refresh() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    mount_courses_for(&server, "a1").await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::ZERO))
        .expect(0)
        .mount(&server)
        .await;

    let courses: Value = manager.client().get("/courses").await.unwrap();
    assert_eq!(courses[0]["title"], "Algebra");

    assert_eq!(store.access_token().unwrap().as_deref(), Some("a1"));
    assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
    assert!(!manager.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_non_401_errors_pass_through() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;

    Mock::given(method("GET"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::ZERO))
        .expect(0)
        .mount(&server)
        .await;

    let err = manager.client().get::<Value>("/payments").await.unwrap_err();
    match err {
        ClientError::Api(ApiError::ServerError(body)) => assert!(body.contains("database")),
        other => panic!("Expected ServerError, got {:?}", other),
    }
    assert_eq!(store.clears(), 0);
}

#[tokio::test]
async fn test_post_with_empty_response_body() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store).await;

    Mock::given(method("POST"))
        .and(path("/packages"))
        .and(header("authorization", "Bearer a1"))
        .and(body_json(json!({ "title": "Exam prep" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::new(Method::POST, "/packages")
        .json(&json!({ "title": "Exam prep" }))
        .unwrap();
    let value = manager.client().send(&request).await.unwrap();
    assert_eq!(value, Value::Null);
}

// ============================================================================
// Refresh and retry
// ============================================================================

#[tokio::test]
async fn test_missing_access_token_refreshes_and_retries() {
    let store = Arc::new(CountingStore::with_tokens(None, Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    mount_courses_for(&server, "a2").await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(refresh_ok(Duration::ZERO))
        .expect(1)
        .mount(&server)
        .await;

    let courses: Value = manager.client().get("/courses").await.unwrap();
    assert_eq!(courses[0]["id"], 1);

    // First attempt went out without a token, the retry with the new one
    let requests: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/courses")
        .collect();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(requests[1].headers.get("authorization").unwrap(), "Bearer a2");

    assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
    assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    mount_courses_for(&server, "a2").await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = manager.client();
    let results = join_all((0..5).map(|_| client.get::<Value>("/courses"))).await;
    for result in results {
        assert_eq!(result.unwrap()[0]["title"], "Algebra");
    }

    let retried_with_new_token = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/courses")
        .filter(|r| r.headers.get("authorization").is_some_and(|v| v == "Bearer a2"))
        .count();
    assert_eq!(retried_with_new_token, 5);
    assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
}

#[tokio::test]
async fn test_refresh_failure_rejects_all_and_clears_once() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    let mut events = manager.subscribe();
    mount_courses_for(&server, "a2").await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "error": "Invalid refresh token" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = manager.client();
    let results = join_all((0..4).map(|_| client.get::<Value>("/courses"))).await;
    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_session_expired(), "unexpected error: {:?}", err);
    }

    assert_eq!(store.clears(), 1);
    assert!(store.load().unwrap().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::RefreshFailed
        }]
    );
}

#[tokio::test]
async fn test_second_401_is_not_retried_again() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    let mut events = manager.subscribe();

    Mock::given(method("GET"))
        .and(path("/students"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::ZERO))
        .expect(1)
        .mount(&server)
        .await;

    let err = manager.client().get::<Value>("/students").await.unwrap_err();
    assert!(matches!(err, ClientError::Api(ApiError::Unauthorized)));

    // The refresh itself succeeded, so the session stays
    assert_eq!(store.clears(), 0);
    assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);
}

#[tokio::test]
async fn test_401_without_refresh_token_ends_session() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), None));
    let (server, manager) = setup(store.clone()).await;
    let mut events = manager.subscribe();
    mount_courses_for(&server, "a2").await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::ZERO))
        .expect(0)
        .mount(&server)
        .await;

    let err = manager.client().get::<Value>("/courses").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::SessionExpired(RefreshError::MissingRefreshToken)
    ));
    assert_eq!(store.clears(), 1);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::MissingRefreshToken
        }]
    );
}

// ============================================================================
// Late 401s
// ============================================================================

#[tokio::test]
async fn test_late_401_retries_with_already_refreshed_token() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    mount_courses_for(&server, "a2").await;

    // `/reports` rejects the old token only after the refresh has finished
    Mock::given(method("GET"))
        .and(path("/reports"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 3 })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let client = manager.client();
    let (courses, reports) = tokio::join!(
        client.get::<Value>("/courses"),
        client.get::<Value>("/reports")
    );
    assert_eq!(courses.unwrap()[0]["title"], "Algebra");
    assert_eq!(reports.unwrap()["total"], 3);

    let reports: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/reports")
        .collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].headers.get("authorization").unwrap(), "Bearer a1");
    assert_eq!(reports[1].headers.get("authorization").unwrap(), "Bearer a2");
    assert_eq!(store.clears(), 0);
}

#[tokio::test]
async fn test_late_401_after_failed_refresh_does_not_end_session_again() {
    let store = Arc::new(CountingStore::with_tokens(Some("a1"), Some("r1")));
    let (server, manager) = setup(store.clone()).await;
    let mut events = manager.subscribe();

    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let client = manager.client();
    let (fast, slow) = tokio::join!(
        client.get::<Value>("/fast"),
        client.get::<Value>("/slow")
    );
    assert!(matches!(
        fast.unwrap_err(),
        ClientError::SessionExpired(RefreshError::Rejected(_))
    ));
    assert!(matches!(
        slow.unwrap_err(),
        ClientError::SessionExpired(RefreshError::MissingRefreshToken)
    ));

    assert_eq!(store.clears(), 1);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::RefreshFailed
        }]
    );
}
