// ABOUTME: In-process key-distribution broker built on tokio broadcast channels
// ABOUTME: One channel per topic plus a bounded replay buffer of recent payloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::{KeyBroker, PayloadStream, RETAINED_MESSAGES};
use crate::errors::AppResult;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Per-subscriber buffer; a subscriber that falls this far behind skips messages
const CHANNEL_CAPACITY: usize = 64;

struct Topic {
    sender: broadcast::Sender<Vec<u8>>,
    history: Mutex<VecDeque<Vec<u8>>>,
}

/// In-process broker; clones share the same topics
#[derive(Clone, Default)]
pub struct InMemoryKeyBroker {
    topics: Arc<DashMap<String, Arc<Topic>>>,
}

impl InMemoryKeyBroker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| {
                    let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
                    Arc::new(Topic {
                        sender,
                        history: Mutex::new(VecDeque::with_capacity(RETAINED_MESSAGES)),
                    })
                })
                .value(),
        )
    }

    /// Number of live subscribers on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |entry| entry.sender.receiver_count())
    }
}

#[async_trait::async_trait]
impl KeyBroker for InMemoryKeyBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()> {
        let entry = self.topic(topic);
        {
            let mut history = entry.history.lock().await;
            if history.len() == RETAINED_MESSAGES {
                history.pop_front();
            }
            history.push_back(payload.to_vec());
        }

        // No receivers is not an error: the payload stays in history
        match entry.sender.send(payload.to_vec()) {
            Ok(receivers) => debug!(topic, receivers, "Published key update"),
            Err(_) => debug!(topic, "Published key update with no live subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<PayloadStream> {
        let receiver = self.topic(topic).sender.subscribe();
        let topic = topic.to_owned();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((Ok(payload), receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Key update subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn retained(&self, topic: &str) -> AppResult<Vec<Vec<u8>>> {
        let Some(entry) = self.topics.get(topic).map(|entry| Arc::clone(entry.value())) else {
            return Ok(Vec::new());
        };
        let history = entry.history.lock().await;
        Ok(history.iter().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_bounded() {
        let broker = InMemoryKeyBroker::new();
        for i in 0..(RETAINED_MESSAGES + 5) {
            broker.publish("t", i.to_string().as_bytes()).await.unwrap();
        }

        let retained = broker.retained("t").await.unwrap();
        assert_eq!(retained.len(), RETAINED_MESSAGES);
        assert_eq!(retained[0], b"5".to_vec());
    }

    #[tokio::test]
    async fn test_subscriber_receives_live_messages() {
        let broker = InMemoryKeyBroker::new();
        let mut stream = broker.subscribe("t").await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);

        broker.publish("t", b"hello").await.unwrap();
        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, b"hello".to_vec());
    }
}
