// ABOUTME: Sliding-window rate limiting middleware for authenticated requests
// ABOUTME: Sets X-RateLimit headers on every checked request and answers 429 with Retry-After
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Rate Limiting Middleware with HTTP Headers
//!
//! Runs after the verification gate and keys the window by the authenticated
//! user. Requests without an [`AuthContext`] and `OPTIONS` requests are not
//! counted. When the limiter fails open no headers are added.

use crate::auth::AuthContext;
use crate::constants::headers;
use crate::errors::AppError;
use crate::rate_limiting::{RateLimitDecision, SlidingWindowRateLimiter};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, Method};
use tracing::info;

/// Create a `HeaderMap` with rate limit headers
#[must_use]
pub fn create_rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut map = HeaderMap::new();

    map.insert(headers::X_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    map.insert(
        headers::X_RATE_LIMIT_REMAINING,
        HeaderValue::from(decision.remaining),
    );
    map.insert(
        headers::X_RATE_LIMIT_RESET,
        HeaderValue::from(decision.reset_at),
    );

    if !decision.allowed {
        map.insert(
            headers::RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs),
        );
    }

    map
}

/// Error for a rejected decision
#[must_use]
pub fn create_rate_limit_error(decision: &RateLimitDecision, window_secs: u64) -> AppError {
    AppError::rate_limited(decision.limit, window_secs)
}

/// Axum middleware counting requests against `limiter`
pub async fn enforce_rate_limit(
    State(limiter): State<SlidingWindowRateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let Some(identity) = req
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.user_id.to_string())
    else {
        return next.run(req).await;
    };

    let Some(decision) = limiter.check_and_record(&identity).await else {
        return next.run(req).await;
    };

    let rate_headers = create_rate_limit_headers(&decision);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        info!(
            identity,
            prefix = %limiter.policy().key_prefix,
            limit = decision.limit,
            "Request rejected by rate limiter"
        );
        create_rate_limit_error(&decision, limiter.policy().window.as_secs()).into_response()
    };

    response.headers_mut().extend(rate_headers);
    response
}
