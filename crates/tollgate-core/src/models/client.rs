// ABOUTME: Registered OAuth 2.0 client model with confidential/public typing and trust flag
// ABOUTME: Redirect URIs are matched exactly; trust can only be granted by static configuration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScopeSet;
use crate::constants::grant_types;

/// Client type (RFC 6749 §2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Can keep a secret (server-side application)
    Confidential,
    /// Cannot keep a secret (SPA, native app); must use PKCE S256
    Public,
}

impl ClientType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confidential => "confidential",
            Self::Public => "public",
        }
    }

    /// Parse storage representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confidential" => Some(Self::Confidential),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

/// Registered OAuth 2.0 client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Client {
    /// OAuth 2.0 client identifier
    pub client_id: String,
    /// Argon2 PHC hash of the client secret; `None` for public clients
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    /// Registered redirect URIs, never empty
    pub redirect_uris: Vec<String>,
    /// Scopes this client may request
    pub allowed_scopes: ScopeSet,
    /// Confidential or public
    pub client_type: ClientType,
    /// First-party client that skips the consent screen
    pub trusted: bool,
    /// Disabled clients fail validation but keep their history
    pub disabled: bool,
    /// Human-readable client name shown on the consent screen
    pub client_name: Option<String>,
    /// Grant types this client may use
    pub grant_types: Vec<String>,
    /// When this client was registered
    pub created_at: DateTime<Utc>,
}

impl OAuth2Client {
    /// Whether the client is public
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }

    /// Exact redirect URI match. No prefix, case-folding, or normalization is applied.
    #[must_use]
    pub fn has_redirect_uri(&self, candidate: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == candidate)
    }

    /// Whether the client may use `grant_type`
    #[must_use]
    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    /// Grant types assigned when none are requested
    #[must_use]
    pub fn default_grant_types() -> Vec<String> {
        vec![
            grant_types::AUTHORIZATION_CODE.to_owned(),
            grant_types::REFRESH_TOKEN.to_owned(),
        ]
    }

    /// Name to show to end users
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(&self.client_id)
    }
}
