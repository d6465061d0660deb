// ABOUTME: Key rotation and publication: generate, stage, publish to the broker, then commit
// ABOUTME: A failed publish leaves the previous key and version authoritative
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::store::{generate_blocking, KeyVersionStore};
use crate::broker::KeyBroker;
use crate::errors::AppResult;
use crate::models::KeyUpdateMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Result of a successful rotation
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    /// Version now used for signing
    pub key_version: u64,
    /// Published public key
    pub public_key_pem: String,
    /// Issue time of the new key
    pub issued_at: DateTime<Utc>,
}

/// Rotates the issuer key and distributes the public half
pub struct KeyUpdatePublisher {
    store: Arc<KeyVersionStore>,
    broker: Arc<dyn KeyBroker>,
    topic: String,
    key_bits: usize,
    // Serializes rotations so two triggers never race for the same version
    rotation_lock: Mutex<()>,
}

impl KeyUpdatePublisher {
    /// Create a publisher for `store` on `topic`
    #[must_use]
    pub fn new(
        store: Arc<KeyVersionStore>,
        broker: Arc<dyn KeyBroker>,
        topic: impl Into<String>,
        key_bits: usize,
    ) -> Self {
        Self {
            store,
            broker,
            topic: topic.into(),
            key_bits,
            rotation_lock: Mutex::new(()),
        }
    }

    /// Key store this publisher rotates
    #[must_use]
    pub const fn store(&self) -> &Arc<KeyVersionStore> {
        &self.store
    }

    /// Generate a new key pair and make it authoritative once it has been published
    ///
    /// # Errors
    ///
    /// - `KeyMaterialError` if generation or staging fails
    /// - `BrokerUnavailable` if publishing fails
    ///
    /// In both cases the previous key and version remain in effect.
    pub async fn rotate(&self) -> AppResult<RotationOutcome> {
        let _guard = self.rotation_lock.lock().await;

        let next_version = self.store.current_version().await + 1;
        info!(key_version = next_version, "Starting key rotation");

        let key_pair = generate_blocking(self.key_bits).await?;
        let staged = self.store.stage(next_version, key_pair).await?;

        let message = KeyUpdateMessage {
            updated_at: staged.issued_at(),
            ..KeyUpdateMessage::new(
                next_version,
                staged.public_key_pem().to_owned(),
                self.store.service_name(),
            )
        };
        let published = match message.to_payload() {
            Ok(payload) => self.broker.publish(&self.topic, &payload).await,
            Err(e) => Err(e),
        };

        if let Err(e) = published {
            error!(
                key_version = next_version,
                topic = %self.topic,
                "Key update publish failed, keeping current key: {}",
                e
            );
            self.store.discard(staged).await;
            return Err(e);
        }

        let issued_at = staged.issued_at();
        let public_key_pem = staged.public_key_pem().to_owned();
        let key_version = self.store.commit(staged).await?;

        info!(key_version, topic = %self.topic, "Key rotation completed");
        Ok(RotationOutcome {
            key_version,
            public_key_pem,
            issued_at,
        })
    }

    /// Re-publish the active key so verifiers that missed it can register it
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if publishing fails
    pub async fn announce_current(&self) -> AppResult<()> {
        let record = self.store.current_record().await;
        let message = KeyUpdateMessage {
            updated_at: record.issued_at,
            ..KeyUpdateMessage::new(record.version, record.public_key_pem, &record.issuer)
        };

        self.broker
            .publish(&self.topic, &message.to_payload()?)
            .await
            .inspect_err(|e| warn!(key_version = record.version, "Key announcement failed: {}", e))
    }
}
