// ABOUTME: Key-distribution broker abstraction with pluggable transport backends
// ABOUTME: Redis pub/sub for multi-process deployments, in-process broadcast for single process and tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Key-Distribution Broker
//!
//! Transport for key-update messages between the issuer and every verifier.
//! Payloads are opaque bytes; decoding belongs to the consumer.
//!
//! Both backends retain the most recent messages per topic so a verifier
//! that (re)subscribes can catch up on rotations it missed. Replayed
//! messages may duplicate live ones; registry insertion is idempotent.

/// Backend selection from configuration
pub mod factory;
/// In-process broadcast backend
pub mod memory;
/// Redis pub/sub backend
pub mod redis;

pub use factory::create_key_broker;
pub use memory::InMemoryKeyBroker;
pub use self::redis::RedisKeyBroker;

use crate::errors::AppResult;
use futures_util::stream::BoxStream;

/// Number of messages retained per topic for replay
pub const RETAINED_MESSAGES: usize = 32;

/// Live stream of payloads published after subscription
pub type PayloadStream = BoxStream<'static, AppResult<Vec<u8>>>;

/// Key-distribution transport
#[async_trait::async_trait]
pub trait KeyBroker: Send + Sync {
    /// Publish a payload; succeeds even if nobody is subscribed
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if the message could not be handed to the broker
    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()>;

    /// Subscribe to payloads published from now on
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if the subscription cannot be established
    async fn subscribe(&self, topic: &str) -> AppResult<PayloadStream>;

    /// Most recent retained payloads, oldest first
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if the history cannot be read
    async fn retained(&self, topic: &str) -> AppResult<Vec<Vec<u8>>>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}
