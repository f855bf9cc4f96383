// ABOUTME: Consent ledger row and decision types
// ABOUTME: One record per (user, client) pair with upsert semantics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScopeSet;

/// Latest consent granted by a user to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// End user
    pub user_id: String,
    /// Client the consent was granted to
    pub client_id: String,
    /// Granted scope
    pub scope: ScopeSet,
    /// When the consent was (last) granted
    pub granted_at: DateTime<Utc>,
}

/// Outcome of a consent lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentDecision {
    /// Consent already covers the request (or the client is trusted)
    Skip,
    /// The consent screen must be shown
    Show,
    /// A prior consent exists but is older than the configured lifetime
    Expired,
}

impl ConsentDecision {
    /// Whether user interaction is needed
    #[must_use]
    pub const fn requires_interaction(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}
