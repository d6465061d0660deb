// ABOUTME: Background consumer applying key-update messages from the broker to the registry
// ABOUTME: Replays retained messages on (re)subscribe, skips malformed payloads, backs off on broker errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::registry::{InsertOutcome, PublicKeyRegistry};
use super::{shutdown_channel, BackgroundTask, KeyVersionRecord};
use crate::broker::{KeyBroker, PayloadStream};
use crate::models::KeyUpdateMessage;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Consumes the key-distribution topic into a [`PublicKeyRegistry`]
#[derive(Clone)]
pub struct KeyUpdateConsumer {
    broker: Arc<dyn KeyBroker>,
    registry: Arc<PublicKeyRegistry>,
    topic: String,
    backoff: Duration,
}

impl KeyUpdateConsumer {
    /// Create a consumer; nothing runs until [`Self::start`]
    #[must_use]
    pub fn new(
        broker: Arc<dyn KeyBroker>,
        registry: Arc<PublicKeyRegistry>,
        topic: impl Into<String>,
        backoff: Duration,
    ) -> Self {
        Self {
            broker,
            registry,
            topic: topic.into(),
            backoff,
        }
    }

    /// Subscribe and spawn the consume loop
    ///
    /// The first subscription is attempted before this returns, so messages
    /// published afterwards are not missed. If it fails the loop keeps
    /// retrying in the background.
    pub async fn start(self) -> BackgroundTask {
        let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
        let initial = self.open().await;

        info!(
            topic = %self.topic,
            backend = self.broker.backend_name(),
            "Starting key update consumer"
        );

        let handle = tokio::spawn(async move {
            self.run(initial, &mut shutdown_rx).await;
            info!(topic = %self.topic, "Key update consumer stopped");
        });

        BackgroundTask::new("key-update-consumer", shutdown_tx, handle)
    }

    /// Subscribe, then apply the retained history
    ///
    /// Subscribing first means nothing published in between is lost; anything
    /// seen twice is absorbed by idempotent insertion.
    async fn open(&self) -> Option<PayloadStream> {
        let stream = match self.broker.subscribe(&self.topic).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(topic = %self.topic, "Key update subscription failed: {}", e);
                return None;
            }
        };

        match self.broker.retained(&self.topic).await {
            Ok(history) => {
                debug!(topic = %self.topic, count = history.len(), "Replaying retained key updates");
                for payload in &history {
                    self.apply(payload).await;
                }
            }
            Err(e) => warn!(topic = %self.topic, "Could not replay key history: {}", e),
        }

        Some(stream)
    }

    async fn run(&self, mut current: Option<PayloadStream>, shutdown_rx: &mut mpsc::Receiver<()>) {
        loop {
            let Some(stream) = current.as_mut() else {
                if self.wait_backoff(shutdown_rx).await {
                    return;
                }
                current = self.open().await;
                continue;
            };

            tokio::select! {
                // Messages first: a ready update is applied before shutdown is honoured
                biased;
                item = stream.next() => match item {
                    Some(Ok(payload)) => {
                        self.apply(&payload).await;
                    }
                    Some(Err(e)) => {
                        error!(topic = %self.topic, "Key update stream failed: {}", e);
                        current = None;
                    }
                    None => {
                        warn!(topic = %self.topic, "Key update stream closed, resubscribing");
                        current = None;
                    }
                },
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    /// Sleep for the backoff period; true if shutdown was requested meanwhile
    async fn wait_backoff(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.backoff) => false,
            _ = shutdown_rx.recv() => true,
        }
    }

    /// Decode one payload and register its key; failures are logged and skipped
    pub async fn apply(&self, payload: &[u8]) -> Option<InsertOutcome> {
        let message = match KeyUpdateMessage::from_payload(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %self.topic, "Skipping malformed key update: {}", e.message);
                return None;
            }
        };

        let version = message.key_version;
        let service = message.service_name.clone();
        match self.registry.insert(KeyVersionRecord::from(message)).await {
            Ok(outcome) => {
                debug!(key_version = version, service = %service, ?outcome, "Applied key update");
                Some(outcome)
            }
            Err(e) => {
                warn!(key_version = version, "Skipping key update with unusable key: {}", e.message);
                None
            }
        }
    }
}
