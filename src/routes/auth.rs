// ABOUTME: Login, logout and identity routes for the issuer and gateway routers
// ABOUTME: Login is public; everything else runs behind the verification gate and rate limiter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::auth::{AuthContext, AuthService, LoginResult};
use crate::errors::{AppError, AppResult};
use crate::middleware::{enforce_rate_limit, require_auth, AuthGate};
use crate::rate_limiting::SlidingWindowRateLimiter;
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Login request payload
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Login email
    pub email: String,
    /// Plain-text password
    pub password: String,
}

/// Identity of the caller as seen by the gate
#[derive(Debug, Clone, Serialize)]
pub struct WhoAmIResponse {
    /// Authenticated user
    pub user_id: Uuid,
    /// Granted permissions
    pub permissions: Vec<String>,
    /// Version of the key that verified the token
    pub key_version: u64,
}

/// Logout result
#[derive(Debug, Clone, Serialize)]
pub struct LogoutResponse {
    /// Human-readable result
    pub message: String,
    /// Number of sessions revoked
    pub revoked: u64,
}

/// Dependencies of the issuer-side auth routes
#[derive(Clone)]
pub struct AuthRoutesContext {
    /// Login and logout flows
    pub service: Arc<AuthService>,
    /// Verification gate
    pub gate: AuthGate,
    /// General API limiter
    pub api_limiter: SlidingWindowRateLimiter,
    /// Strict limiter for session-changing endpoints
    pub strict_limiter: SlidingWindowRateLimiter,
}

/// Authentication routes
pub struct AuthRoutes;

impl AuthRoutes {
    /// Issuer routes: login, logout, logout-all and whoami
    pub fn routes(context: AuthRoutesContext) -> Router {
        let service = context.service;

        let login = Router::new()
            .route("/auth/login", post(Self::handle_login))
            .with_state(Arc::clone(&service));

        let logout = Router::new()
            .route("/auth/logout", post(Self::handle_logout))
            .with_state(Arc::clone(&service))
            .layer(middleware::from_fn_with_state(
                context.strict_limiter.clone(),
                enforce_rate_limit,
            ));

        // Killing every session gets its own window so it cannot starve single logouts.
        let logout_all_limiter = context
            .strict_limiter
            .with_policy(context.strict_limiter.policy().for_endpoint("logout-all"));
        let logout_all = Router::new()
            .route("/auth/logout-all", post(Self::handle_logout_all))
            .with_state(service)
            .layer(middleware::from_fn_with_state(
                logout_all_limiter,
                enforce_rate_limit,
            ));

        let gated = Self::whoami_routes(context.api_limiter)
            .merge(logout)
            .merge(logout_all)
            .layer(middleware::from_fn_with_state(context.gate, require_auth));

        login.merge(gated)
    }

    /// Gateway routes: whoami only, gated and rate limited
    pub fn gateway_routes(gate: AuthGate, api_limiter: SlidingWindowRateLimiter) -> Router {
        Self::whoami_routes(api_limiter).layer(middleware::from_fn_with_state(gate, require_auth))
    }

    fn whoami_routes(api_limiter: SlidingWindowRateLimiter) -> Router {
        Router::new()
            .route("/auth/me", get(Self::handle_whoami))
            .layer(middleware::from_fn_with_state(api_limiter, enforce_rate_limit))
    }

    async fn handle_login(
        State(service): State<Arc<AuthService>>,
        Json(request): Json<LoginRequest>,
    ) -> AppResult<Json<LoginResult>> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(AppError::invalid_input("Email and password are required"));
        }
        let result = service.login(&request.email, &request.password).await?;
        Ok(Json(result))
    }

    async fn handle_whoami(Extension(context): Extension<AuthContext>) -> Json<WhoAmIResponse> {
        Json(WhoAmIResponse {
            user_id: context.user_id,
            permissions: context.permissions,
            key_version: context.key_version,
        })
    }

    async fn handle_logout(
        State(service): State<Arc<AuthService>>,
        Extension(context): Extension<AuthContext>,
    ) -> AppResult<Json<LogoutResponse>> {
        let revoked = service.logout(context.user_id, &context.token).await?;
        Ok(Json(LogoutResponse {
            message: "Logged out".to_owned(),
            revoked: u64::from(revoked),
        }))
    }

    async fn handle_logout_all(
        State(service): State<Arc<AuthService>>,
        Extension(context): Extension<AuthContext>,
    ) -> AppResult<Json<LogoutResponse>> {
        let revoked = service.logout_all(context.user_id).await?;
        Ok(Json(LogoutResponse {
            message: "All sessions revoked".to_owned(),
            revoked,
        }))
    }
}
