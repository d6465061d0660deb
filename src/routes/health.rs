// ABOUTME: Health check route reporting liveness and the newest verification key version
// ABOUTME: Used by load balancers; never touches the session store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::keys::PublicKeyRegistry;
use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(registry: Arc<PublicKeyRegistry>, role: &'static str) -> Router {
        async fn health_handler(
            State((registry, role)): State<(Arc<PublicKeyRegistry>, &'static str)>,
        ) -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "status": "healthy",
                "role": role,
                "latest_key_version": registry.latest_version().await,
                "known_key_versions": registry.versions().await,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }))
        }

        Router::new()
            .route("/health", get(health_handler))
            .with_state((registry, role))
    }
}
