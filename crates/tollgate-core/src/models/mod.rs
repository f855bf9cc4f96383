// ABOUTME: Core data models for the Tollgate authorization server
// ABOUTME: Re-exports clients, scopes, authorization codes, consent, token families, and signing keys
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! # Data Models
//!
//! Persistence and domain models shared by the token engine, the storage backends,
//! and the HTTP layer.
//!
//! - `OAuth2Client`: registered client (static or dynamic)
//! - `ScopeSet`: normalized set of scope tokens
//! - `AuthorizationCode`: single-use code bound to a PKCE challenge
//! - `PendingAuthorization`: validated request waiting for user consent
//! - `ConsentRecord`: latest consent per user and client
//! - `TokenFamily` / `RefreshTokenRecord`: refresh-token lineage for rotation and reuse detection
//! - `SigningKeyRecord`: RSA key with lifecycle state
//! - `UserRecord`: claims source for the userinfo endpoint

mod authorization;
mod client;
mod consent;
mod scope;
mod signing_key;
mod token;
mod user;

pub use authorization::{AuthorizationCode, PendingAuthorization, PkceMethod};
pub use client::{ClientType, OAuth2Client};
pub use consent::{ConsentDecision, ConsentRecord};
pub use scope::ScopeSet;
pub use signing_key::{KeyState, SigningKeyRecord};
pub use token::{ConsumeOutcome, RefreshTokenRecord, TokenFamily, TokenPair};
pub use user::UserRecord;
