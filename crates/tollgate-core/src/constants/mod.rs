// ABOUTME: Protocol constants for the Tollgate authorization server
// ABOUTME: Token lifetimes, grant types, well-known scopes, PKCE bounds, and key rotation defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Application constants organized by domain

/// Default lifetimes for codes, tokens, and pending consent
pub mod ttl {
    /// Authorization code lifetime (10 minutes, RFC 6749 §4.1.2 recommends at most 10 minutes)
    pub const AUTH_CODE_SECS: i64 = 600;
    /// Access token lifetime (15 minutes)
    pub const ACCESS_TOKEN_SECS: i64 = 900;
    /// Refresh token lifetime (30 days)
    pub const REFRESH_TOKEN_SECS: i64 = 30 * 24 * 60 * 60;
    /// ID token lifetime (15 minutes)
    pub const ID_TOKEN_SECS: i64 = 900;
    /// Pending consent request lifetime (10 minutes)
    pub const PENDING_CONSENT_SECS: i64 = 600;
    /// Clock-skew leeway applied to externally presented JWTs
    pub const JWT_LEEWAY_SECS: u64 = 60;
}

/// Signing key lifecycle defaults
pub mod keys {
    /// Only RS256 is issued
    pub const SIGNING_ALGORITHM: &str = "RS256";
    /// Default RSA modulus size for new keys
    pub const RSA_KEY_SIZE: usize = 2048;
    /// How long a retiring key keeps verifying after a newer key is promoted
    pub const RETIRING_OVERLAP_DAYS: i64 = 7;
    /// Minimum gap between reloads triggered by tokens signed with an unknown kid
    pub const UNKNOWN_KID_RELOAD_SECS: i64 = 5;
}

/// OAuth 2.0 grant types
pub mod grant_types {
    /// Authorization code grant (RFC 6749 §4.1)
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    /// Refresh token grant (RFC 6749 §6)
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Client credentials grant (RFC 6749 §4.4)
    pub const CLIENT_CREDENTIALS: &str = "client_credentials";
}

/// Well-known scope values
pub mod scopes {
    /// Requests an ID token
    pub const OPENID: &str = "openid";
    /// Name and picture claims at userinfo
    pub const PROFILE: &str = "profile";
    /// Email claims at userinfo
    pub const EMAIL: &str = "email";
    /// Requests a refresh token for confidential clients
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// PKCE parameter bounds (RFC 7636 §4.1)
pub mod pkce {
    /// Minimum verifier/challenge length
    pub const MIN_LENGTH: usize = 43;
    /// Maximum verifier/challenge length
    pub const MAX_LENGTH: usize = 128;
}

/// Client authentication methods (RFC 7591 §2)
pub mod auth_methods {
    /// Public client, no secret
    pub const NONE: &str = "none";
    /// Secret in the HTTP Basic header
    pub const CLIENT_SECRET_BASIC: &str = "client_secret_basic";
    /// Secret in the form body
    pub const CLIENT_SECRET_POST: &str = "client_secret_post";
}

/// Token type hints (RFC 7009 §2.1)
pub mod token_type_hints {
    /// Access token hint
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Refresh token hint
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Service identity
pub mod service {
    /// Name reported in logs and discovery
    pub const SERVICE_NAME: &str = "tollgate";
    /// Crate version
    pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
