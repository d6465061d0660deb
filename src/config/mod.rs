// ABOUTME: Configuration module for the auth services
// ABOUTME: Environment-driven server settings and Redis connection tuning
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Configuration loaded exclusively from environment variables.

/// Server configuration from environment variables
pub mod environment;
/// Redis connection settings and connection bootstrap
pub mod redis;

pub use environment::{
    BrokerConfig, KeyIssuerConfig, RateLimitSettings, ServerConfig, SessionSettings, TokenConfig,
};
pub use self::redis::RedisConnectionConfig;
