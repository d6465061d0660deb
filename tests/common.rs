// ABOUTME: Shared test utilities and fixtures for integration tests
// ABOUTME: Cached RSA keys, in-memory auth stacks, axum request helpers and failing backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `taskhub_auth`

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware,
    routing::get,
    Extension, Json, Router,
};
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;
use taskhub_auth::{
    auth::{AuthContext, TokenIssuer, TokenVerifier},
    broker::{InMemoryKeyBroker, KeyBroker, PayloadStream},
    errors::{AppError, AppResult},
    keys::{KeyUpdatePublisher, KeyVersionStore, PublicKeyRegistry, RsaKeyPair},
    middleware::{enforce_rate_limit, require_auth, AuthGate},
    rate_limiting::{SlidingWindowRateLimiter, WindowStore},
    session::{InMemorySessionStore, SessionRecord, SessionStore},
};
use tower::ServiceExt;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        let _ = tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .try_init();
    });
}

const CACHED_KEYS: usize = 3;
static KEY_PEMS: OnceLock<Vec<String>> = OnceLock::new();

/// One of a few pre-generated 2048-bit key pairs; `index` wraps around
pub fn cached_key_pair(index: usize) -> RsaKeyPair {
    let pems = KEY_PEMS.get_or_init(|| {
        (0..CACHED_KEYS)
            .map(|_| {
                RsaKeyPair::generate(2048)
                    .unwrap()
                    .private_key_pem()
                    .unwrap()
            })
            .collect()
    });
    RsaKeyPair::from_private_key_pem(&pems[index % CACHED_KEYS]).unwrap()
}

/// Issuer and verifier halves wired over in-memory backends
pub struct TestAuthStack {
    pub store: Arc<KeyVersionStore>,
    pub broker: Arc<InMemoryKeyBroker>,
    pub publisher: Arc<KeyUpdatePublisher>,
    pub registry: Arc<PublicKeyRegistry>,
    pub sessions: Arc<InMemorySessionStore>,
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub gate: AuthGate,
}

pub const TEST_TOPIC: &str = "key-updates-test";

/// Stack whose issuer starts at `version` with a cached key
pub async fn create_test_stack(version: u64) -> TestAuthStack {
    init_test_logging();
    let store = Arc::new(
        KeyVersionStore::in_memory(cached_key_pair(0), version, "userService").unwrap(),
    );
    let broker = Arc::new(InMemoryKeyBroker::new());
    let publisher = Arc::new(KeyUpdatePublisher::new(
        Arc::clone(&store),
        Arc::clone(&broker) as Arc<dyn KeyBroker>,
        TEST_TOPIC,
        2048,
    ));
    let registry =
        Arc::new(PublicKeyRegistry::with_bootstrap(store.current_record().await).unwrap());
    let sessions = Arc::new(InMemorySessionStore::new());
    let verifier = TokenVerifier::new(Arc::clone(&registry));
    let gate = AuthGate::new(
        verifier.clone(),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Duration::from_millis(500),
    );

    TestAuthStack {
        issuer: TokenIssuer::new(Arc::clone(&store), chrono::Duration::hours(1)),
        store,
        broker,
        publisher,
        registry,
        sessions,
        verifier,
        gate,
    }
}

impl TestAuthStack {
    /// Issue a token and record a live session for it
    pub async fn login(&self, user_id: Uuid, permissions: &[&str]) -> String {
        let issued = self
            .issuer
            .issue(user_id, permissions.iter().map(|p| (*p).to_owned()).collect())
            .await
            .unwrap();
        self.sessions
            .create_session(user_id, &issued.token, issued.expires_at)
            .await
            .unwrap();
        issued.token
    }
}

/// `GET /protected` behind the gate and an optional limiter, echoing the auth context
pub fn protected_router(gate: AuthGate, limiter: Option<SlidingWindowRateLimiter>) -> Router {
    async fn echo(Extension(ctx): Extension<AuthContext>) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "user_id": ctx.user_id,
            "permissions": ctx.permissions,
            "key_version": ctx.key_version,
        }))
    }

    let mut router = Router::new().route("/protected", get(echo).options(|| async { "ok" }));
    if let Some(limiter) = limiter {
        router = router.layer(middleware::from_fn_with_state(limiter, enforce_rate_limit));
    }
    router.layer(middleware::from_fn_with_state(gate, require_auth))
}

/// Helper to build and execute HTTP requests against axum routers
pub struct TestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl TestRequest {
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn options(uri: &str) -> Self {
        Self::new(Method::OPTIONS, uri)
    }

    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header(header::AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    pub fn json(mut self, data: &serde_json::Value) -> Self {
        self.body = Some(data.to_string());
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
    }

    pub async fn send(self, app: Router) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (key, value) in self.headers {
            builder = builder.header(key, value);
        }

        let request = builder
            .body(Body::from(self.body.unwrap_or_default()))
            .expect("Failed to build request");
        let response = app.oneshot(request).await.expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body")
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Fully read axum response
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Vec<u8>,
}

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.parse().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Failed to deserialize JSON response")
    }
}

/// Broker whose publish always fails
pub struct FailingBroker;

#[async_trait::async_trait]
impl KeyBroker for FailingBroker {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> AppResult<()> {
        Err(AppError::broker_unavailable("broker is down"))
    }

    async fn subscribe(&self, _topic: &str) -> AppResult<PayloadStream> {
        Err(AppError::broker_unavailable("broker is down"))
    }

    async fn retained(&self, _topic: &str) -> AppResult<Vec<Vec<u8>>> {
        Err(AppError::broker_unavailable("broker is down"))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Session store whose every call fails
pub struct FailingSessionStore;

#[async_trait::async_trait]
impl SessionStore for FailingSessionStore {
    async fn create_session(
        &self,
        _user_id: Uuid,
        _token: &str,
        _expires_at: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<()> {
        Err(AppError::store_unavailable("store is down"))
    }

    async fn is_session_valid(&self, _user_id: Uuid, _token: &str) -> AppResult<bool> {
        Err(AppError::store_unavailable("store is down"))
    }

    async fn revoke_session(&self, _user_id: Uuid, _token: &str) -> AppResult<bool> {
        Err(AppError::store_unavailable("store is down"))
    }

    async fn revoke_all_user_sessions(&self, _user_id: Uuid) -> AppResult<u64> {
        Err(AppError::store_unavailable("store is down"))
    }

    async fn get_session(&self, _user_id: Uuid, _token: &str) -> AppResult<Option<SessionRecord>> {
        Err(AppError::store_unavailable("store is down"))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Session store that answers "valid" only after `stall`
pub struct StallingSessionStore {
    pub stall: Duration,
}

#[async_trait::async_trait]
impl SessionStore for StallingSessionStore {
    async fn create_session(
        &self,
        _user_id: Uuid,
        _token: &str,
        _expires_at: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<()> {
        tokio::time::sleep(self.stall).await;
        Ok(())
    }

    async fn is_session_valid(&self, _user_id: Uuid, _token: &str) -> AppResult<bool> {
        tokio::time::sleep(self.stall).await;
        Ok(true)
    }

    async fn revoke_session(&self, _user_id: Uuid, _token: &str) -> AppResult<bool> {
        tokio::time::sleep(self.stall).await;
        Ok(false)
    }

    async fn revoke_all_user_sessions(&self, _user_id: Uuid) -> AppResult<u64> {
        tokio::time::sleep(self.stall).await;
        Ok(0)
    }

    async fn get_session(&self, _user_id: Uuid, _token: &str) -> AppResult<Option<SessionRecord>> {
        tokio::time::sleep(self.stall).await;
        Ok(None)
    }

    fn backend_name(&self) -> &'static str {
        "stalling"
    }
}

/// Window store that fails or stalls on every call
pub struct BrokenWindowStore {
    pub stall: Option<Duration>,
}

#[async_trait::async_trait]
impl WindowStore for BrokenWindowStore {
    async fn prune_and_count(&self, _key: &str, _window_start_nanos: i64) -> AppResult<u64> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
            return Ok(0);
        }
        Err(AppError::store_unavailable("store is down"))
    }

    async fn record(
        &self,
        _key: &str,
        _member: &str,
        _score_nanos: i64,
        _ttl: Duration,
    ) -> AppResult<()> {
        Err(AppError::store_unavailable("store is down"))
    }

    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

/// Poll `check` until it returns true or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Skip the test when `REDIS_URL` is not set
#[macro_export]
macro_rules! require_redis {
    () => {
        match std::env::var("REDIS_URL") {
            Ok(url) => url,
            Err(_) => {
                println!("Skipping test: REDIS_URL not set");
                return;
            }
        }
    };
}
