// ABOUTME: Core types and constants for the Tollgate OAuth2/OIDC provider
// ABOUTME: Foundation crate with error taxonomy, domain models, and protocol constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![deny(unsafe_code)]

//! # Tollgate Core
//!
//! Foundation crate providing shared types and constants for the Tollgate
//! authorization server. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: `AppError`/`ErrorCode` for infrastructure failures, `OAuth2Error` for
//!   protocol failures, and `StorageError` for the persistence layer
//! - **constants**: Token lifetimes, grant types, scopes, and claim names
//! - **models**: Clients, authorization codes, consent, token families, signing keys

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants and protocol values organized by domain
pub mod constants;

/// Core data models (clients, codes, consent, refresh tokens, signing keys)
pub mod models;
