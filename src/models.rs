// ABOUTME: Wire and collaborator data models for key distribution and login
// ABOUTME: Key-update message codec and the user record returned by the credentials lookup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message published on the key-distribution topic after every rotation
///
/// ```json
/// {"id": "…", "public_key_pem": "-----BEGIN PUBLIC KEY-----…",
///  "updated_at": "2025-01-01T00:00:00Z", "service_name": "userService",
///  "key_version": 2}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdateMessage {
    /// Unique message id
    pub id: Uuid,
    /// Public key, PEM-encoded SPKI
    pub public_key_pem: String,
    /// Time the key was issued
    pub updated_at: DateTime<Utc>,
    /// Issuing service
    pub service_name: String,
    /// Version the key is registered under
    pub key_version: u64,
}

impl KeyUpdateMessage {
    /// Build a fresh message for a newly issued key
    #[must_use]
    pub fn new(key_version: u64, public_key_pem: String, service_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            public_key_pem,
            updated_at: Utc::now(),
            service_name: service_name.to_owned(),
            key_version,
        }
    }

    /// Serialize to the JSON payload carried by the broker
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails
    pub fn to_payload(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(AppError::from)
    }

    /// Decode a broker payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the payload is not a well-formed key-update message
    pub fn from_payload(payload: &[u8]) -> AppResult<Self> {
        let message: Self = serde_json::from_slice(payload).map_err(|e| {
            AppError::invalid_input(format!("Malformed key update message: {e}")).with_source(e)
        })?;

        if !message.public_key_pem.contains("BEGIN PUBLIC KEY") {
            return Err(AppError::invalid_input(format!(
                "Key update message {} does not carry a PEM public key",
                message.id
            )));
        }

        Ok(message)
    }
}

/// User record returned by the credentials collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// User identifier placed in token claims
    pub user_id: Uuid,
    /// Login name
    pub email: String,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// Permissions granted to the user
    pub permissions: Vec<String>,
}
