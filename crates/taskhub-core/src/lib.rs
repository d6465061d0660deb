// ABOUTME: Core types and constants for the TaskHub authentication subsystem
// ABOUTME: Foundation crate with error handling and domain constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

#![deny(unsafe_code)]

//! # TaskHub Core
//!
//! Foundation crate shared by every TaskHub authentication component. It is
//! kept small and stable so that the main crate recompiles independently.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode` and `AppResult`
//! - **constants**: Header names, store key prefixes and default limits

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants organized by domain
pub mod constants;
