// ABOUTME: HTTP middleware for token verification, permissions, rate limiting and request tracing
// ABOUTME: Axum from_fn_with_state layers shared by issuer and gateway routers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

/// Token verification gate
pub mod auth;
/// Permission guard
pub mod permissions;
/// Sliding-window rate limiting with response headers
pub mod rate_limiting;
/// Request spans
pub mod tracing;

// Authentication middleware
pub use auth::{bearer_token, require_auth, AuthGate};

// Permission guard
pub use permissions::{check_permission, require_permission, RequiredPermission};

// Rate limiting middleware and utilities
pub use rate_limiting::{create_rate_limit_error, create_rate_limit_headers, enforce_rate_limit};

// Request tracing
pub use self::tracing::create_request_span;
