// ABOUTME: Configuration module for server settings and the static client registry
// ABOUTME: Environment variables drive ServerConfig; a YAML file lists first-party clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors
//! Configuration for the Tollgate authorization server
//!
//! - **Environment**: listener, issuer, storage, lifetimes, and limits from `TOLLGATE_*`
//!   environment variables
//! - **Clients**: the static client registry loaded from `TOLLGATE_CLIENTS_FILE`
//!
//! Configuration is passed explicitly to every component at construction time.

/// Static client registry loaded from YAML
pub mod clients;
/// Environment and server configuration
pub mod environment;

pub use clients::{StaticClientEntry, StaticClientsConfig};
pub use environment::{RateLimitConfig, ServerConfig, TokenLifetimes};
