// ABOUTME: Signing key record with pending -> active -> retiring -> expired lifecycle
// ABOUTME: Private key material is PKCS#8 PEM owned exclusively by the key manager
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// Generated and published, not yet used for signing
    Pending,
    /// The one key used for signing
    Active,
    /// Replaced by a newer key; still verifies until `not_after`
    Retiring,
    /// No longer published or accepted
    Expired,
}

impl KeyState {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Retiring => "retiring",
            Self::Expired => "expired",
        }
    }

    /// Parse storage representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "retiring" => Some(Self::Retiring),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted signing key
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Key identifier placed in JWT headers
    pub kid: String,
    /// JWS algorithm
    pub algorithm: String,
    /// Lifecycle state
    pub state: KeyState,
    /// PKCS#8 PEM private key
    pub private_key_pem: String,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window (exclusive); `None` while pending or active
    pub not_after: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl SigningKeyRecord {
    /// Whether the key is inside `[not_before, not_after)` and not expired
    #[must_use]
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        self.state != KeyState::Expired
            && now >= self.not_before
            && self.not_after.is_none_or(|end| now < end)
    }

    /// Whether the key belongs in the published JWKS
    #[must_use]
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.state != KeyState::Expired && self.not_after.is_none_or(|end| end > now)
    }
}

impl fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("state", &self.state)
            .field("private_key_pem", &"[REDACTED]")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}
