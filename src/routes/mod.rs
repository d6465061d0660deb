// ABOUTME: Route module organization for the TaskHub auth HTTP endpoints
// ABOUTME: Thin handlers delegating to the auth service, key publisher and registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Route module for TaskHub authentication
//!
//! Each domain module contains only route definitions and thin handler
//! functions that delegate to service layers.

/// Login, logout and identity routes
pub mod auth;
/// Health check route
pub mod health;
/// Issuer key endpoints
pub mod keys;

/// Authentication route handlers
pub use auth::{AuthRoutes, AuthRoutesContext, LoginRequest};
/// Health route handlers
pub use health::HealthRoutes;
/// Key route handlers
pub use keys::{KeyRoutes, KeyRoutesContext, KEYS_ROTATE_PERMISSION};
