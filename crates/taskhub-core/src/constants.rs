// ABOUTME: Domain constants for key rotation, sessions, rate limiting and HTTP headers
// ABOUTME: Shared defaults used by configuration loading and by tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Constants module
//!
//! Constants are grouped into domain modules rather than a single flat list.

/// Service identities used in logs and key-update messages
pub mod service_names {
    /// Default issuer name carried in key-update messages
    pub const KEY_ISSUER: &str = "userService";
    /// Default verifier service name
    pub const GATEWAY: &str = "apiService";
    /// Crate name used for log filter directives
    pub const TASKHUB_AUTH: &str = "taskhub_auth";
}

/// Asymmetric signing key constants
pub mod keys {
    /// Minimum RSA modulus size. Smaller requests are upgraded to this value.
    pub const MIN_RSA_KEY_BITS: usize = 2048;

    /// Default key rotation interval
    pub const DEFAULT_ROTATION_INTERVAL_HOURS: u64 = 24;

    /// File name of the active private key (PKCS#8 PEM)
    pub const PRIVATE_KEY_FILE: &str = "private.pem";

    /// File name of the active public key (SPKI PEM)
    pub const PUBLIC_KEY_FILE: &str = "public.pem";

    /// File name of the persisted key version metadata
    pub const VERSION_FILE: &str = "key_version.json";

    /// Default key-distribution topic
    pub const DEFAULT_KEY_UPDATE_TOPIC: &str = "key-updates";

    /// Pause before the consumer resubscribes after a broker failure
    pub const DEFAULT_CONSUMER_BACKOFF_SECS: u64 = 5;

    /// How often superseded public keys are checked for retirement
    pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3_600;
}

/// Token and session constants
pub mod sessions {
    /// Default lifetime of a signed token and its session
    pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

    /// Key prefix for sessions: `session:{user_id}:{sha256(token)}`
    pub const SESSION_KEY_PREFIX: &str = "session:";

    /// Upper bound for a session-store round trip on the request path
    pub const DEFAULT_SESSION_STORE_TIMEOUT_MS: u64 = 5_000;

    /// How often the in-memory session store drops expired records
    pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;
}

/// Sliding-window rate limiting constants
pub mod rate_limits {
    /// Default per-user API limit
    pub const DEFAULT_API_LIMIT: u32 = 200;

    /// Limit for sensitive endpoints
    pub const DEFAULT_STRICT_LIMIT: u32 = 20;

    /// Default sliding window
    pub const DEFAULT_WINDOW_SECS: u64 = 60;

    /// Grace added to the window when setting the key TTL
    pub const KEY_TTL_GRACE_SECS: u64 = 1;

    /// Upper bound for a rate-limit store round trip
    pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

    /// Key prefix for the default API limiter
    pub const API_KEY_PREFIX: &str = "ratelimit:user:";

    /// Key prefix for the strict limiter
    pub const STRICT_KEY_PREFIX: &str = "ratelimit:user:strict:";
}

/// Redis connection defaults
pub mod redis {
    /// Connection timeout in seconds
    pub const CONNECTION_TIMEOUT_SECS: u64 = 5;
    /// Per-command response timeout in seconds
    pub const RESPONSE_TIMEOUT_SECS: u64 = 2;
    /// Reconnection attempts performed by the connection manager
    pub const RECONNECTION_RETRIES: usize = 3;
    /// Exponential backoff base used by the connection manager
    pub const RETRY_EXPONENT_BASE: u64 = 2;
    /// Attempts made while establishing the first connection
    pub const INITIAL_CONNECTION_RETRIES: u32 = 3;
    /// First backoff delay between initial connection attempts
    pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
    /// Backoff cap
    pub const MAX_RETRY_DELAY_MS: u64 = 5_000;
}

/// HTTP header names
pub mod headers {
    /// Maximum requests allowed in the current window
    pub const X_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
    /// Remaining requests in the current window
    pub const X_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
    /// Unix timestamp when the window resets
    pub const X_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
    /// Seconds until a rejected caller may retry
    pub const RETRY_AFTER: &str = "Retry-After";
    /// Bearer scheme prefix of the Authorization header
    pub const BEARER_PREFIX: &str = "Bearer ";
}
