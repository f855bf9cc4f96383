// ABOUTME: JWT claim sets for access and ID tokens plus bearer-token authentication
// ABOUTME: Access tokens carry the refresh family id (fid) so revoking a family invalidates them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::error::Error as StdError;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::ScopeSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::key_management::KeyManager;
use crate::oauth2_server::revocation::RevocationRegistry;

/// Claim names the issuer controls; hook-supplied claims may not override them
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "aud",
    "exp",
    "iat",
    "nbf",
    "jti",
    "scope",
    "client_id",
    "fid",
];

/// JWT validation error with detailed information
#[derive(Debug, Clone)]
pub enum JwtValidationError {
    /// Token has expired
    TokenExpired {
        /// When the token expired
        expired_at: DateTime<Utc>,
        /// Current time for reference
        current_time: DateTime<Utc>,
    },
    /// Signature, issuer, audience, or key check failed
    TokenInvalid {
        /// Reason for invalidity
        reason: String,
    },
    /// Token is malformed (not proper `JWT` format)
    TokenMalformed {
        /// Details about malformation
        details: String,
    },
}

impl fmt::Display for JwtValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenExpired {
                expired_at,
                current_time,
            } => {
                let ago = current_time.signed_duration_since(*expired_at);
                write!(
                    f,
                    "JWT token expired {} seconds ago at {}",
                    ago.num_seconds(),
                    expired_at.format("%Y-%m-%d %H:%M:%S UTC")
                )
            }
            Self::TokenInvalid { reason } => write!(f, "JWT token signature is invalid: {reason}"),
            Self::TokenMalformed { details } => write!(f, "JWT token is malformed: {details}"),
        }
    }
}

impl StdError for JwtValidationError {}

impl From<JwtValidationError> for OAuth2Error {
    fn from(error: JwtValidationError) -> Self {
        match error {
            JwtValidationError::TokenExpired { .. } => {
                Self::InvalidToken("The access token expired".to_owned())
            }
            JwtValidationError::TokenInvalid { .. } | JwtValidationError::TokenMalformed { .. } => {
                Self::InvalidToken("The access token is invalid".to_owned())
            }
        }
    }
}

/// Claims of an RS256 access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer
    pub iss: String,
    /// End user (or client id for client-credentials tokens)
    pub sub: String,
    /// Audience: the client the token was issued to
    pub aud: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Unique token id
    pub jti: String,
    /// Space-delimited granted scope
    pub scope: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Refresh family id used for revocation checks
    pub fid: Uuid,
    /// Custom claims added by hooks
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessTokenClaims {
    /// Granted scope as a set
    #[must_use]
    pub fn scope_set(&self) -> ScopeSet {
        ScopeSet::parse(&self.scope)
    }
}

/// Claims of an `OpenID` Connect ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,
    /// End user
    pub sub: String,
    /// Client id
    pub aud: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// When the end user authenticated (unix seconds)
    pub auth_time: i64,
    /// Nonce from the authorization request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Left half of SHA-256 of the access token, base64url
    pub at_hash: String,
}

/// OIDC `at_hash` for an RS256 access token
#[must_use]
pub fn access_token_hash(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Verify a bearer access token and reject it when its family has been revoked
///
/// # Errors
///
/// Returns `InvalidToken` for a bad signature, expired token, or revoked family
pub async fn authenticate_bearer(
    keys: &KeyManager,
    revocation: &RevocationRegistry,
    token: &str,
) -> Result<AccessTokenClaims, OAuth2Error> {
    let claims: AccessTokenClaims = keys.verify(token, None).await.map_err(|e| {
        debug!("Bearer token rejected: {e}");
        OAuth2Error::from(e)
    })?;
    if claims.aud != claims.client_id {
        return Err(OAuth2Error::InvalidToken(
            "The access token is invalid".to_owned(),
        ));
    }
    if revocation.is_family_revoked(claims.fid).await? {
        warn!(family_id = %claims.fid, client_id = %claims.client_id, "Access token from revoked family presented");
        return Err(OAuth2Error::InvalidToken(
            "The access token has been revoked".to_owned(),
        ));
    }
    Ok(claims)
}
