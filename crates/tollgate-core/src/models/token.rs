// ABOUTME: Refresh-token family, refresh-token record, and issued token pair models
// ABOUTME: Also defines ConsumeOutcome, the result of every single-use conditional update
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScopeSet;

/// Lineage of refresh tokens produced by successive rotations of one grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFamily {
    /// Family identifier (also embedded in access tokens as `fid`)
    pub family_id: Uuid,
    /// Client the grant was issued to
    pub client_id: String,
    /// End user (or client id for client-credentials grants)
    pub user_id: String,
    /// Hash of the authorization code that started the family, if any
    pub code_hash: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set once, never cleared
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why the family was revoked
    pub revoked_reason: Option<String>,
}

impl TokenFamily {
    /// Revocation is permanent
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Stored refresh token. The raw token value is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Token identifier (referenced by `rotated_from`)
    pub token_id: Uuid,
    /// Hex SHA-256 of the opaque token
    pub token_hash: String,
    /// Family this token belongs to
    pub family_id: Uuid,
    /// Client the token was issued to
    pub client_id: String,
    /// End user
    pub user_id: String,
    /// Scope carried by this token
    pub scope: ScopeSet,
    /// When the end user originally authenticated
    pub auth_time: DateTime<Utc>,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry (exclusive)
    pub expires_at: DateTime<Utc>,
    /// Token this one replaced
    pub rotated_from: Option<Uuid>,
    /// Set exactly once when the token is rotated away
    pub consumed_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    /// Expired at and after `expires_at`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of exchanging a code or refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed JWT access token
    pub access_token: String,
    /// Opaque refresh token, absent for client-credentials grants
    pub refresh_token: Option<String>,
    /// Family of the refresh token
    pub refresh_token_family: Uuid,
    /// End user
    pub user_id: String,
    /// Client
    pub client_id: String,
    /// Granted scope
    pub scope: ScopeSet,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token expiry
    pub refresh_expires_at: Option<DateTime<Utc>>,
    /// Refresh token this pair replaced
    pub rotated_from: Option<Uuid>,
    /// OIDC ID token when `openid` was granted
    pub id_token: Option<String>,
}

/// Outcome of an atomic "mark consumed if not yet consumed" update
#[derive(Debug, Clone)]
pub enum ConsumeOutcome<T> {
    /// This caller won the race; the row is now consumed
    Consumed(T),
    /// The row existed but had already been consumed (replay)
    AlreadyConsumed(T),
    /// No such row
    NotFound,
}
