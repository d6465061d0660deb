// ABOUTME: Permission guard for routes that need a specific claim permission
// ABOUTME: Returns 403 Forbidden when the authenticated context lacks the permission
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::auth::AuthContext;
use crate::errors::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::Method;
use tracing::warn;

/// Permission a route requires; used as middleware state
#[derive(Debug, Clone)]
pub struct RequiredPermission(pub &'static str);

/// Check `context` for `permission`
///
/// # Errors
///
/// Returns `PermissionDenied` if the permission is missing
pub fn check_permission(context: &AuthContext, permission: &str) -> Result<(), AppError> {
    if context.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::permission_denied(format!(
            "Missing required permission: {permission}"
        )))
    }
}

/// Axum middleware enforcing a [`RequiredPermission`]; must run inside the gate
pub async fn require_permission(
    State(RequiredPermission(permission)): State<RequiredPermission>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let Some(context) = req.extensions().get::<AuthContext>() else {
        return AppError::unauthenticated("Authentication required").into_response();
    };

    if let Err(e) = check_permission(context, permission) {
        warn!(user_id = %context.user_id, permission, "Permission denied");
        return e.into_response();
    }

    next.run(req).await
}
