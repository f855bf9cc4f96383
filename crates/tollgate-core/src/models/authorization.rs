// ABOUTME: Authorization code and pending-consent models bound to PKCE challenges
// ABOUTME: Codes are stored by hash and consumed exactly once; expiry is exclusive
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScopeSet;

/// PKCE code challenge method (RFC 7636 §4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    /// `BASE64URL(SHA256(verifier)) == challenge`
    S256,
    /// `verifier == challenge`, confidential clients only
    #[serde(rename = "plain")]
    Plain,
}

impl PkceMethod {
    /// Wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }

    /// Parse wire representation (case-sensitive per RFC 7636)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "S256" => Some(Self::S256),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// Stored authorization code.
///
/// The raw code is only ever returned to the client; the store keeps its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Hex SHA-256 of the code value
    pub code_hash: String,
    /// Client that requested the code
    pub client_id: String,
    /// End user who approved the request
    pub user_id: String,
    /// Redirect URI that must be repeated at the token endpoint
    pub redirect_uri: String,
    /// Granted scope
    pub scope: ScopeSet,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE method
    pub code_challenge_method: Option<PkceMethod>,
    /// OIDC nonce echoed into the ID token
    pub nonce: Option<String>,
    /// When the end user authenticated
    pub auth_time: DateTime<Utc>,
    /// When the code was issued
    pub issued_at: DateTime<Utc>,
    /// Expiry (exclusive)
    pub expires_at: DateTime<Utc>,
    /// Set exactly once by the conditional consume
    pub consumed_at: Option<DateTime<Utc>>,
    /// Set when a consumed code is presented again
    pub replayed_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    /// A code is expired at and after `expires_at`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the code has been redeemed (successfully or not)
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

/// Validated authorization request awaiting the end user's consent decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// Opaque identifier handed to the consent screen
    pub consent_id: String,
    /// End user who must decide
    pub user_id: String,
    /// Requesting client
    pub client_id: String,
    /// Validated redirect URI
    pub redirect_uri: String,
    /// Requested scope
    pub scope: ScopeSet,
    /// Client state echoed back on redirect
    pub state: Option<String>,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE method
    pub code_challenge_method: Option<PkceMethod>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// When the end user authenticated
    pub auth_time: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry (exclusive)
    pub expires_at: DateTime<Utc>,
}

impl PendingAuthorization {
    /// Expired at and after `expires_at`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
