// ABOUTME: Issuer key endpoints: current public key and manual rotation trigger
// ABOUTME: Rotation requires the keys:rotate permission and never advances the version on failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::errors::{AppError, AppResult};
use crate::keys::KeyUpdatePublisher;
use crate::middleware::{
    enforce_rate_limit, require_auth, require_permission, AuthGate, RequiredPermission,
};
use crate::rate_limiting::SlidingWindowRateLimiter;
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Permission required to trigger a rotation
pub const KEYS_ROTATE_PERMISSION: &str = "keys:rotate";

/// Current public key of the issuer
#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyResponse {
    /// Active key version
    pub key_version: u64,
    /// SPKI PEM of the active key
    pub key: String,
    /// Issuing service
    pub service_name: String,
    /// When the active key was issued
    pub issued_at: DateTime<Utc>,
}

/// Result of a manual rotation
#[derive(Debug, Clone, Serialize)]
pub struct RegenerateResponse {
    /// Human-readable result
    pub message: String,
    /// Newly active key version
    pub key_version: u64,
}

/// Dependencies of the key routes
#[derive(Clone)]
pub struct KeyRoutesContext {
    /// Rotation entry point
    pub publisher: Arc<KeyUpdatePublisher>,
    /// Verification gate
    pub gate: AuthGate,
    /// Strict limiter for rotation requests
    pub strict_limiter: SlidingWindowRateLimiter,
}

/// Key distribution routes
pub struct KeyRoutes;

impl KeyRoutes {
    /// Create all key routes
    pub fn routes(context: KeyRoutesContext) -> Router {
        let public = Router::new()
            .route("/keys/public", get(Self::handle_public_key))
            .with_state(Arc::clone(&context.publisher));

        let regenerate_limiter = context
            .strict_limiter
            .with_policy(context.strict_limiter.policy().for_endpoint("keys-regenerate"));

        // Layers run bottom-up: gate, then limiter, then permission check.
        let regenerate = Router::new()
            .route("/keys/regenerate", post(Self::handle_regenerate))
            .with_state(context.publisher)
            .layer(middleware::from_fn_with_state(
                RequiredPermission(KEYS_ROTATE_PERMISSION),
                require_permission,
            ))
            .layer(middleware::from_fn_with_state(
                regenerate_limiter,
                enforce_rate_limit,
            ))
            .layer(middleware::from_fn_with_state(context.gate, require_auth));

        public.merge(regenerate)
    }

    async fn handle_public_key(
        State(publisher): State<Arc<KeyUpdatePublisher>>,
    ) -> Json<PublicKeyResponse> {
        let record = publisher.store().current_record().await;
        Json(PublicKeyResponse {
            key_version: record.version,
            key: record.public_key_pem,
            service_name: record.issuer,
            issued_at: record.issued_at,
        })
    }

    async fn handle_regenerate(
        State(publisher): State<Arc<KeyUpdatePublisher>>,
    ) -> AppResult<Json<RegenerateResponse>> {
        let outcome = publisher.rotate().await.map_err(|e| {
            error!("Manual key rotation failed: {}", e);
            AppError::internal(format!("Failed to regenerate keys: {}", e.message))
        })?;

        info!(key_version = outcome.key_version, "Keys regenerated on request");
        Ok(Json(RegenerateResponse {
            message: "Keys regenerated successfully".to_owned(),
            key_version: outcome.key_version,
        }))
    }
}
