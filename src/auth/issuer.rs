// ABOUTME: RS256 token issuer signing with the active key of the issuer key store
// ABOUTME: Header kid carries the key version so verifiers can pick the right key directly
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::Claims;
use crate::errors::{AppError, AppResult};
use crate::keys::KeyVersionStore;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use std::sync::Arc;
use uuid::Uuid;

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWS
    pub token: String,
    /// Expiry matching the `exp` claim
    pub expires_at: DateTime<Utc>,
    /// Version of the signing key
    pub key_version: u64,
}

/// Signs tokens with whatever key is active at the time of the call
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<KeyVersionStore>,
    ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer producing tokens valid for `ttl`
    #[must_use]
    pub const fn new(store: Arc<KeyVersionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Token lifetime
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `user_id` carrying `permissions`
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if signing fails
    pub async fn issue(&self, user_id: Uuid, permissions: Vec<String>) -> AppResult<IssuedToken> {
        let signing_key = self.store.signing_key().await;
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let claims = Claims {
            user_id,
            permissions,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(signing_key.version.to_string());

        let token = encode(&header, &claims, &signing_key.encoding_key)
            .map_err(|e| AppError::key_material(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            // Second precision, identical to what verifiers read from `exp`
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
            key_version: signing_key.version,
        })
    }
}
