// ABOUTME: Signing key lifecycle: generation, issuer-side versioning, rotation and distribution
// ABOUTME: Verifier-side public key registry kept current by a broker consumer loop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Key Management
//!
//! The issuer owns exactly one active private key at a time. Rotation is
//! all-or-nothing: a new key pair becomes authoritative only after its public
//! half has been published on the key-distribution topic.
//!
//! ```text
//! generator -> KeyVersionStore -> KeyUpdatePublisher -> (broker) -> KeyUpdateConsumer -> PublicKeyRegistry
//!                                        ^
//!                               KeyRotationScheduler
//! ```
//!
//! Verifiers never delete registry entries on their own, so a token signed
//! with an older key stays verifiable for as long as its session lives.

/// Background consumer applying key-update messages to the registry
pub mod consumer;
/// RSA key pair generation
pub mod generator;
/// Rotation: generate, stage, publish, commit
pub mod publisher;
/// Verifier-side version to public key map
pub mod registry;
/// Periodic rotation trigger
pub mod scheduler;
/// Issuer-side active key and version counter
pub mod store;

pub use consumer::KeyUpdateConsumer;
pub use generator::RsaKeyPair;
pub use publisher::{KeyUpdatePublisher, RotationOutcome};
pub use registry::{InsertOutcome, PublicKeyRegistry, RegistryEntry};
pub use scheduler::{KeyRotationScheduler, SchedulerState};
pub use store::{KeyVersionStore, SigningKey};

use crate::models::KeyUpdateMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Immutable description of one published public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionRecord {
    /// Monotonically increasing per issuer
    pub version: u64,
    /// SPKI PEM public key
    pub public_key_pem: String,
    /// Time the key was issued
    pub issued_at: DateTime<Utc>,
    /// Issuing service
    pub issuer: String,
}

impl From<KeyUpdateMessage> for KeyVersionRecord {
    fn from(message: KeyUpdateMessage) -> Self {
        Self {
            version: message.key_version,
            public_key_pem: message.public_key_pem,
            issued_at: message.updated_at,
            issuer: message.service_name,
        }
    }
}

/// Handle to a spawned loop that stops on a shutdown signal
///
/// `stop` never blocks and may be called any number of times; `shutdown`
/// additionally waits for the loop to finish its current unit of work.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) const fn new(
        name: &'static str,
        shutdown_tx: mpsc::Sender<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop to stop without waiting
    pub fn stop(&self) {
        // Full means a stop is already pending, Closed means the loop is gone
        let _ = self.shutdown_tx.try_send(());
    }

    /// Whether the loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, "Background task ended abnormally: {}", e);
        }
    }
}

/// Shutdown channel for a background loop; capacity one so repeated stops coalesce
pub(crate) fn shutdown_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}
