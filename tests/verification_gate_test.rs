// ABOUTME: Integration tests for the token verification gate and permission guard middleware
// ABOUTME: Missing/forged/expired tokens, fail-closed session checks, OPTIONS bypass and 403s
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::{middleware, routing::post, Router};
use chrono::Utc;
use common::{
    cached_key_pair, create_test_stack, protected_router, FailingSessionStore,
    StallingSessionStore, TestRequest,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskhub_auth::{
    auth::{Claims, TokenVerifier},
    middleware::{require_auth, require_permission, AuthGate, RequiredPermission},
    session::SessionStore,
};
use uuid::Uuid;

fn sign_with(claims: &Claims, key_index: usize, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(ToOwned::to_owned);
    encode(
        &header,
        claims,
        &cached_key_pair(key_index).encoding_key().unwrap(),
    )
    .unwrap()
}

fn claims_for(user_id: Uuid, exp_offset_secs: i64) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        user_id,
        permissions: vec!["read".to_owned()],
        exp: now + exp_offset_secs,
        iat: now,
    }
}

#[tokio::test]
async fn test_valid_token_attaches_identity() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    let token = stack.login(user_id, &["read", "write"]).await;

    let response = TestRequest::get("/protected")
        .bearer(&token)
        .send(protected_router(stack.gate.clone(), None))
        .await;

    assert_eq!(response.status(), 200);
    let body = response.json();
    assert_eq!(body["user_id"], user_id.to_string());
    assert_eq!(body["permissions"], serde_json::json!(["read", "write"]));
    assert_eq!(body["key_version"], 1);
}

#[tokio::test]
async fn test_missing_or_malformed_header_is_unauthenticated() {
    let stack = create_test_stack(1).await;

    let missing = TestRequest::get("/protected")
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(missing.status(), 401);
    assert_eq!(
        missing.json()["error"],
        "Missing or invalid Authorization header"
    );

    let wrong_scheme = TestRequest::get("/protected")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(wrong_scheme.status(), 401);

    let empty = TestRequest::get("/protected")
        .header("authorization", "Bearer ")
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(empty.status(), 401);
}

#[tokio::test]
async fn test_garbage_token_is_rejected_without_panicking() {
    let stack = create_test_stack(1).await;

    for token in ["abc", "a.b.c", "....", "eyJhbGciOiJSUzI1NiJ9.e30.", "x.y.z.w"] {
        let response = TestRequest::get("/protected")
            .header("authorization", &format!("Bearer {token}"))
            .send(protected_router(stack.gate.clone(), None))
            .await;
        assert_eq!(response.status(), 401, "token {token:?} was not rejected");
        assert!(response.json()["error"].is_string());
    }
}

#[tokio::test]
async fn test_token_signed_by_unknown_key_is_invalid() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    // Key index 2 never enters the registry
    let forged = sign_with(&claims_for(user_id, 600), 2, Some("1"));
    stack
        .sessions
        .create_session(user_id, &forged, Utc::now() + chrono::Duration::minutes(10))
        .await
        .unwrap();

    let response = TestRequest::get("/protected")
        .bearer(&forged)
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(response.status(), 401);
    assert_eq!(response.json()["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_token_without_kid_is_verified_by_trying_keys() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    let token = sign_with(&claims_for(user_id, 600), 0, None);
    stack
        .sessions
        .create_session(user_id, &token, Utc::now() + chrono::Duration::minutes(10))
        .await
        .unwrap();

    let verified = stack.verifier.verify(&token).await.unwrap();
    assert_eq!(verified.key_version, 1);
    assert_eq!(verified.claims.user_id, user_id);
}

#[tokio::test]
async fn test_expired_token_is_invalid() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    let expired = sign_with(&claims_for(user_id, -5), 0, Some("1"));

    let err = stack.verifier.verify(&expired).await.unwrap_err();
    assert_eq!(err.message, "Token expired");

    let response = TestRequest::get("/protected")
        .bearer(&expired)
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_hs256_token_is_rejected() {
    let stack = create_test_stack(1).await;
    let claims = claims_for(Uuid::new_v4(), 600);
    // Algorithm confusion: HMAC keyed with the public PEM
    let public_pem = stack.store.current_record().await.public_key_pem;
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(public_pem.as_bytes()),
    )
    .unwrap();

    let response = TestRequest::get("/protected")
        .bearer(&token)
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(response.status(), 401);
    assert_eq!(response.json()["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_revoked_session_is_rejected_immediately() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    let token = stack.login(user_id, &["read"]).await;
    let app = protected_router(stack.gate.clone(), None);

    let before = TestRequest::get("/protected")
        .bearer(&token)
        .send(app.clone())
        .await;
    assert_eq!(before.status(), 200);

    assert!(stack.sessions.revoke_session(user_id, &token).await.unwrap());

    let after = TestRequest::get("/protected").bearer(&token).send(app).await;
    assert_eq!(after.status(), 401);
    assert_eq!(after.json()["error"], "Session is invalid or revoked");
}

#[tokio::test]
async fn test_valid_signature_without_session_is_rejected() {
    let stack = create_test_stack(1).await;
    let issued = stack
        .issuer
        .issue(Uuid::new_v4(), vec!["read".to_owned()])
        .await
        .unwrap();

    let response = TestRequest::get("/protected")
        .bearer(&issued.token)
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(response.status(), 401);
    assert_eq!(response.json()["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_session_store_failure_fails_closed() {
    let stack = create_test_stack(1).await;
    let token = stack.login(Uuid::new_v4(), &["read"]).await;

    let gate = AuthGate::new(
        TokenVerifier::new(Arc::clone(&stack.registry)),
        Arc::new(FailingSessionStore),
        Duration::from_millis(200),
    );

    let response = TestRequest::get("/protected")
        .bearer(&token)
        .send(protected_router(gate, None))
        .await;
    assert_eq!(response.status(), 401);
    assert_eq!(response.json()["error"], "Session validation failed");
}

#[tokio::test]
async fn test_session_lookup_timeout_fails_closed() {
    let stack = create_test_stack(1).await;
    let token = stack.login(Uuid::new_v4(), &["read"]).await;

    let gate = AuthGate::new(
        TokenVerifier::new(Arc::clone(&stack.registry)),
        Arc::new(StallingSessionStore {
            stall: Duration::from_secs(10),
        }),
        Duration::from_millis(200),
    );

    let started = Instant::now();
    let response = TestRequest::get("/protected")
        .bearer(&token)
        .send(protected_router(gate, None))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 401);
    assert_eq!(response.json()["error"], "Session validation failed");
    assert!(
        elapsed < Duration::from_secs(2),
        "gate waited {elapsed:?} on a stalled session store"
    );
}

#[tokio::test]
async fn test_options_bypasses_gate() {
    let stack = create_test_stack(1).await;

    let response = TestRequest::options("/protected")
        .send(protected_router(stack.gate.clone(), None))
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_gate_does_not_touch_sessions_or_registry() {
    let stack = create_test_stack(1).await;
    let user_id = Uuid::new_v4();
    let token = stack.login(user_id, &["read"]).await;
    let sessions_before = stack.sessions.len();

    for _ in 0..3 {
        let response = TestRequest::get("/protected")
            .bearer(&token)
            .send(protected_router(stack.gate.clone(), None))
            .await;
        assert_eq!(response.status(), 200);
    }
    let _ = TestRequest::get("/protected")
        .bearer("forged.token.value")
        .send(protected_router(stack.gate.clone(), None))
        .await;

    assert_eq!(stack.sessions.len(), sessions_before);
    assert!(stack.sessions.is_session_valid(user_id, &token).await.unwrap());
    assert_eq!(stack.registry.versions().await, vec![1]);
}

fn guarded_router(gate: AuthGate) -> Router {
    Router::new()
        .route(
            "/admin",
            post(|| async { "rotated" }).options(|| async { "preflight" }),
        )
        .layer(middleware::from_fn_with_state(
            RequiredPermission("keys:rotate"),
            require_permission,
        ))
        .layer(middleware::from_fn_with_state(gate, require_auth))
}

#[tokio::test]
async fn test_permission_guard() {
    let stack = create_test_stack(1).await;
    let reader = stack.login(Uuid::new_v4(), &["read"]).await;
    let admin = stack.login(Uuid::new_v4(), &["read", "keys:rotate"]).await;

    let denied = TestRequest::post("/admin")
        .bearer(&reader)
        .send(guarded_router(stack.gate.clone()))
        .await;
    assert_eq!(denied.status(), 403);
    assert_eq!(denied.json()["code"], "PERMISSION_DENIED");

    let allowed = TestRequest::post("/admin")
        .bearer(&admin)
        .send(guarded_router(stack.gate.clone()))
        .await;
    assert_eq!(allowed.status(), 200);

    let preflight = TestRequest::options("/admin")
        .send(guarded_router(stack.gate.clone()))
        .await;
    assert_eq!(preflight.status(), 200);
}
