// ABOUTME: Token verification gate combining stateless signature checks with session revocation
// ABOUTME: Attaches AuthContext to request extensions; OPTIONS requests bypass the gate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Token Verification Gate
//!
//! Order of checks for every non-`OPTIONS` request:
//!
//! 1. `Authorization: Bearer <token>` present, else `Unauthenticated`
//! 2. signature, algorithm and expiry via [`TokenVerifier`]
//! 3. live session for `(user_id, token)`; a store error or timeout is
//!    treated as a revoked session (fail closed)
//!
//! The gate only reads the registry and the session store.

use crate::auth::{AuthContext, TokenVerifier};
use crate::constants::headers::BEARER_PREFIX;
use crate::errors::{AppError, AppResult};
use crate::logging::token_fingerprint;
use crate::session::SessionStore;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{header::AUTHORIZATION, HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared state of the gate middleware
#[derive(Clone)]
pub struct AuthGate {
    verifier: TokenVerifier,
    sessions: Arc<dyn SessionStore>,
    session_timeout: Duration,
}

impl AuthGate {
    /// Create a gate; every session lookup is bounded by `session_timeout`
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        sessions: Arc<dyn SessionStore>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            sessions,
            session_timeout,
        }
    }

    /// Authenticate the bearer token found in `headers`
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for a missing header or a missing, revoked or
    ///   unverifiable session
    /// - `InvalidToken` for a malformed, expired or unverifiable token
    /// - `KeyMaterialError` if no public key is registered
    pub async fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthContext> {
        let token = bearer_token(headers).ok_or_else(|| {
            AppError::unauthenticated("Missing or invalid Authorization header")
        })?;

        let verified = self.verifier.verify(token).await.map_err(|e| {
            debug!(token = %token_fingerprint(token), "Token rejected: {}", e.message);
            e
        })?;
        let user_id = verified.claims.user_id;

        let lookup = self.sessions.is_session_valid(user_id, token);
        match tokio::time::timeout(self.session_timeout, lookup).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                debug!(%user_id, token = %token_fingerprint(token), "No live session for token");
                return Err(AppError::unauthenticated("Session is invalid or revoked"));
            }
            Ok(Err(e)) => {
                warn!(%user_id, backend = self.sessions.backend_name(), "Session lookup failed: {}", e);
                return Err(AppError::unauthenticated("Session validation failed"));
            }
            Err(_) => {
                warn!(
                    %user_id,
                    timeout_ms = self.session_timeout.as_millis() as u64,
                    "Session lookup timed out"
                );
                return Err(AppError::unauthenticated("Session validation failed"));
            }
        }

        Ok(AuthContext {
            user_id,
            permissions: verified.claims.permissions,
            token: token.to_owned(),
            key_version: verified.key_version,
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum middleware enforcing the gate
///
/// ```rust,no_run
/// use axum::{middleware, routing::get, Router};
/// use taskhub_auth::middleware::{require_auth, AuthGate};
///
/// # async fn handler() -> &'static str { "" }
/// # fn example(gate: AuthGate) {
/// let app: Router = Router::new()
///     .route("/auth/me", get(handler))
///     .layer(middleware::from_fn_with_state(gate, require_auth));
/// # }
/// ```
pub async fn require_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    match gate.authenticate(req.headers()).await {
        Ok(context) => {
            tracing::Span::current()
                .record("user_id", context.user_id.to_string())
                .record("key_version", context.key_version);
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
