// ABOUTME: Cryptographic helpers for opaque credentials and PKCE
// ABOUTME: Random code/token generation, SHA-256 storage hashes, and constant-time comparison
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Cryptographic primitives shared by the token engine

/// Opaque random values (codes, refresh tokens, client secrets)
pub mod random;

/// PKCE challenge computation and verification (RFC 7636)
pub mod pkce;

pub use random::{generate_opaque_token, hash_opaque_token};
