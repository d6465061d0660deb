// ABOUTME: Token claims, authenticated request context and the token issue/verify pipeline
// ABOUTME: RS256 tokens with key-version kid, verified against the public key registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Authentication
//!
//! Claims are trusted only after two independent checks: the signature
//! verifies against a registered public key, and a live session exists for
//! the exact token. Either check failing rejects the request.

/// Token signing with the issuer's active key
pub mod issuer;
/// Login, logout and the credentials collaborator
pub mod service;
/// Signature, algorithm and expiry verification
pub mod verifier;

pub use issuer::{IssuedToken, TokenIssuer};
pub use service::{AuthService, CredentialsProvider, InMemoryCredentialsProvider, LoginResult};
pub use verifier::{TokenVerifier, VerifiedToken};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user
    pub user_id: Uuid,
    /// Granted permissions
    pub permissions: Vec<String>,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issue time, unix seconds
    pub iat: i64,
}

/// Identity attached to a request that passed the verification gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated user
    pub user_id: Uuid,
    /// Granted permissions
    pub permissions: Vec<String>,
    /// Raw bearer token, needed for logout
    pub token: String,
    /// Version of the key that verified the token
    pub key_version: u64,
}

impl AuthContext {
    /// Whether the context carries `permission`
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
