// ABOUTME: Main library entry point for the Tollgate authorization server
// ABOUTME: OAuth 2.0 Authorization Code with PKCE, refresh rotation, rotating JWKS, and OIDC tokens
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![deny(unsafe_code)]

//! # Tollgate
//!
//! An OAuth 2.0 / OpenID Connect token engine for first- and third-party clients.
//!
//! ## Features
//!
//! - **Authorization Code with PKCE**: S256 required for public clients, exact redirect matching
//! - **Consent ledger**: per-user, per-client scope grants with subset checks
//! - **Single-use codes**: replay revokes every token family issued from the code
//! - **Refresh rotation**: reuse of a rotated token revokes the whole family
//! - **Rotating JWKS**: pending, active, retiring, and expired RS256 signing keys
//! - **OIDC**: ID tokens, userinfo, and discovery metadata
//!
//! ## Architecture
//!
//! - **`oauth2_server`**: validation, consent, codes, issuance, and revocation components
//! - **`key_management`**: signing key lifecycle backed by the store
//! - **`storage`**: the [`storage::OAuth2Store`] contract with memory and SQLite backends
//! - **`routes`**: axum handlers for the HTTP surface
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tollgate::config::ServerConfig;
//! use tollgate::resources::ServerResourcesBuilder;
//! use tollgate::server::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let port = config.http_port;
//!     let resources = ServerResourcesBuilder::new(config).build_arc().await?;
//!     resources.keys.bootstrap_if_empty().await?;
//!     run_server(resources, port).await?;
//!     Ok(())
//! }
//! ```

/// Bearer token claims and verification
pub mod auth;

/// Injectable time source
pub mod clock;

/// Environment and static client configuration
pub mod config;

/// Opaque tokens, hashing, and PKCE
pub mod crypto;

/// JSON Web Key Set types and RSA key pairs
pub mod jwks;

/// Signing key lifecycle
pub mod key_management;

/// Structured logging setup
pub mod logging;

/// Security event notifications
pub mod notifications;

/// Authorization server components
pub mod oauth2_server;

/// Shared server resources
pub mod resources;

/// HTTP routes
pub mod routes;

/// HTTP server and background maintenance
pub mod server;

/// Storage contract and backends
pub mod storage;
