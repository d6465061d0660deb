// ABOUTME: Main library entry point for the TaskHub distributed authentication core
// ABOUTME: Key rotation and distribution, token verification, sessions and rate limiting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

#![deny(unsafe_code)]

//! # TaskHub Auth
//!
//! Distributed authentication and access-control core shared by the TaskHub
//! services. One service (the issuer) owns an RSA signing key, rotates it on
//! a schedule and publishes each new public key on a key-distribution topic.
//! Every verifying service keeps a registry of published public keys and
//! checks incoming bearer tokens against it, combined with a shared session
//! store so that logout takes effect immediately.
//!
//! ## Components
//!
//! - **Keys**: key pair generation, issuer key store, publisher, rotation
//!   scheduler, public key registry and its consumer loop
//! - **Broker**: key-distribution transport (Redis pub/sub or in-process)
//! - **Session**: shared session store with revocation
//! - **Rate limiting**: sliding-window limiter over time-scored sets
//! - **Middleware**: axum layers for the verification gate, rate limiting
//!   and permission checks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use taskhub_auth::config::environment::ServerConfig;
//! use taskhub_auth::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("{}", config.summary());
//!     Ok(())
//! }
//! ```

/// Unified error handling shared with the foundation crate
pub use taskhub_core::errors;

/// Domain constants shared with the foundation crate
pub use taskhub_core::constants;

/// Token issuing, verification and the login service
pub mod auth;

/// Key-distribution transport backends
pub mod broker;

/// Environment-based configuration
pub mod config;

/// Signing keys: generation, rotation, distribution and verification registry
pub mod keys;

/// Structured logging setup
pub mod logging;

/// axum middleware for the request path
pub mod middleware;

/// Wire and collaborator data models
pub mod models;

/// Sliding-window rate limiting
pub mod rate_limiting;

/// Shared component wiring for the server roles
pub mod resources;

/// HTTP routes for login and key management
pub mod routes;

/// Session store
pub mod session;
