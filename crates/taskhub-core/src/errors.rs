// ABOUTME: Unified error type, error codes and HTTP status mapping for the auth subsystem
// ABOUTME: Maps authentication, key-material, broker and store failures onto stable responses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Unified Error Handling System
//!
//! Every component of the authentication core reports failures through
//! [`AppError`]. The [`ErrorCode`] decides the HTTP status and the
//! failure policy applied by callers:
//!
//! | Code | Status | Policy |
//! |---|---|---|
//! | `Unauthenticated` | 401 | re-login |
//! | `InvalidToken` | 401 | new token required |
//! | `KeyMaterialError` | 500 | rotation aborted, state untouched |
//! | `BrokerUnavailable` | 503 | rotation fails closed, consumer retries |
//! | `StoreUnavailable` | 503 | limiter fails open, session check fails closed |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the authentication core
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authentication & Authorization (1000-1999)
    /// Credential missing, unknown user, or revoked session
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated = 1000,
    /// Structurally invalid, wrongly signed, wrong algorithm or expired token
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken = 1001,
    /// Authenticated but missing a required permission
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied = 1002,

    // Rate Limiting (2000-2999)
    /// Sliding-window quota exhausted
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded = 2000,

    // Validation (3000-3999)
    /// Caller supplied an invalid value
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,

    // External dependencies (5000-5999)
    /// Key-distribution broker could not publish or consume
    #[serde(rename = "BROKER_UNAVAILABLE")]
    BrokerUnavailable = 5000,
    /// Shared key-value store unreachable or timed out
    #[serde(rename = "STORE_UNAVAILABLE")]
    StoreUnavailable = 5001,

    // Configuration (6000-6999)
    /// Configuration could not be loaded
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,
    /// Configuration value present but unparsable
    #[serde(rename = "CONFIG_INVALID")]
    ConfigInvalid = 6001,

    // Internal Errors (9000-9999)
    /// Signing key material missing, unreadable or unusable
    #[serde(rename = "KEY_MATERIAL_ERROR")]
    KeyMaterialError = 9000,
    /// Unexpected internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9001,
    /// Data serialization/deserialization failed
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9002,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::Unauthenticated | Self::InvalidToken => 401,
            Self::PermissionDenied => 403,
            Self::RateLimitExceeded => 429,
            Self::BrokerUnavailable | Self::StoreUnavailable => 503,
            Self::KeyMaterialError
            | Self::InternalError
            | Self::SerializationError
            | Self::ConfigError
            | Self::ConfigInvalid => 500,
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Authentication is required to access this resource",
            Self::InvalidToken => "The provided token is invalid",
            Self::PermissionDenied => "You do not have permission to perform this action",
            Self::RateLimitExceeded => "Rate limit exceeded. Please slow down your requests",
            Self::InvalidInput => "The provided input is invalid",
            Self::BrokerUnavailable => "The key distribution broker is unavailable",
            Self::StoreUnavailable => "The shared key-value store is unavailable",
            Self::ConfigError => "Configuration error encountered",
            Self::ConfigInvalid => "Configuration is invalid",
            Self::KeyMaterialError => "Signing key material is unavailable",
            Self::InternalError => "An internal server error occurred",
            Self::SerializationError => "Data serialization/deserialization failed",
        }
    }

    /// Stable wire name used in JSON error bodies
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::BrokerUnavailable => "BROKER_UNAVAILABLE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::KeyMaterialError => "KEY_MATERIAL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message, safe to return to clients
    pub message: String,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Missing credential, unknown session or revoked session
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    /// Token failed structural, algorithm, signature or expiry checks
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    /// Authenticated caller lacks a permission
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Sliding-window quota exhausted
    pub fn rate_limited(limit: u32, window_secs: u64) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Too many requests. Limit: {limit} requests per {window_secs}s"),
        )
    }

    /// Invalid caller input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Broker publish or consume failure
    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BrokerUnavailable, message)
    }

    /// Shared store failure or timeout
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnavailable, message)
    }

    /// Private/public key could not be generated, loaded, saved or used
    pub fn key_material(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyMaterialError, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Configuration value present but invalid
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string()).with_source(error)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error body. `error` is always a plain string so clients can display it directly.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Client-facing message
    pub error: String,
    /// Stable machine-readable code
    pub code: ErrorCode,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            error: error.message.clone(),
            code: error.code,
        }
    }
}

#[cfg(feature = "http-response")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = http::StatusCode::from_u16(self.http_status())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(code = self.code.as_str(), error = %self, "request failed");
        }

        (status, axum::Json(ErrorResponse::from(&self))).into_response()
    }
}
