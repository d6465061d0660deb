// ABOUTME: Request span creation for HTTP tracing with identity fields filled in by the gate
// ABOUTME: Generates request IDs when the caller does not send x-request-id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use axum::extract::Request;
use tracing::Span;
use uuid::Uuid;

/// Header carrying a caller-supplied request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID from the headers, or a fresh one
#[must_use]
pub fn request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| format!("req_{}", Uuid::new_v4().simple()), ToOwned::to_owned)
}

/// Span for one HTTP request; `user_id` and `key_version` stay empty until the gate records them
pub fn create_request_span(req: &Request) -> Span {
    tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id(req),
        user_id = tracing::field::Empty,
        key_version = tracing::field::Empty,
    )
}
