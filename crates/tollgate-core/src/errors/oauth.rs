// ABOUTME: OAuth 2.0 protocol error taxonomy with RFC 6749 wire codes and HTTP status mapping
// ABOUTME: Distinguishes redirectable errors from errors that must render a local error page
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use serde::{Deserialize, Serialize};

use super::storage::StorageError;
use super::AppError;

/// Protocol-level failures reported to OAuth clients
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuth2Error {
    /// Malformed or missing request parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Client unknown, disabled, or failed authentication
    #[error("invalid client: {0}")]
    InvalidClient(String),

    /// Redirect URI does not exactly match a registered URI
    #[error("invalid redirect uri: {0}")]
    InvalidRedirect(String),

    /// Requested scope exceeds what the client or grant allows
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Code or refresh token is unknown, expired, consumed, or mismatched
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// A consumed refresh token was presented again; its family has been revoked
    #[error("refresh token reuse detected for family {family_id}")]
    ReuseDetected {
        /// Family that was revoked as a consequence
        family_id: String,
    },

    /// User consent is needed but interaction was not allowed (`prompt=none`)
    #[error("consent required")]
    ConsentRequired,

    /// End user is not authenticated and interaction was not allowed
    #[error("login required")]
    LoginRequired,

    /// The end user or policy denied the request
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Client is not allowed to use this grant type
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Grant type is not supported
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Response type is not supported
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Bearer token presented to a protected resource is not valid
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// No active signing key is available
    #[error("no active signing key: {0}")]
    KeyUnavailable(String),

    /// Rate limited or backing store temporarily unreachable
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// Unexpected internal failure
    #[error("server error: {0}")]
    ServerError(String),
}

impl OAuth2Error {
    /// RFC 6749 / OIDC error code placed in the `error` field
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidRedirect(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidGrant(_) | Self::ReuseDetected { .. } => "invalid_grant",
            Self::ConsentRequired => "consent_required",
            Self::LoginRequired => "login_required",
            Self::AccessDenied(_) => "access_denied",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidToken(_) => "invalid_token",
            Self::TemporarilyUnavailable(_) => "temporarily_unavailable",
            Self::KeyUnavailable(_) | Self::ServerError(_) => "server_error",
        }
    }

    /// HTTP status used when the error is returned directly (not redirected)
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient(_) | Self::InvalidToken(_) => 401,
            Self::AccessDenied(_) => 403,
            Self::TemporarilyUnavailable(_) => 503,
            Self::KeyUnavailable(_) | Self::ServerError(_) => 500,
            _ => 400,
        }
    }

    /// Whether the authorization endpoint may send this error to the client's redirect URI.
    ///
    /// `InvalidClient` and `InvalidRedirect` have no trusted URI to redirect to.
    #[must_use]
    pub const fn is_redirectable(&self) -> bool {
        !matches!(self, Self::InvalidClient(_) | Self::InvalidRedirect(_))
    }

    /// Whether this error represents a detected attack that already triggered revocation
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::ReuseDetected { .. })
    }

    /// Description safe to expose to clients.
    ///
    /// Internal failures are replaced by a generic message.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::KeyUnavailable(_) | Self::ServerError(_) => {
                "The authorization server encountered an unexpected condition".to_owned()
            }
            Self::ReuseDetected { .. } => {
                "Refresh token has already been used; all tokens of this grant were revoked"
                    .to_owned()
            }
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidRedirect(d)
            | Self::InvalidScope(d)
            | Self::InvalidGrant(d)
            | Self::AccessDenied(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidToken(d)
            | Self::TemporarilyUnavailable(d) => d.clone(),
            Self::ConsentRequired => "User consent is required".to_owned(),
            Self::LoginRequired => "User authentication is required".to_owned(),
        }
    }

    /// Reference URI for the error code
    #[must_use]
    pub const fn error_uri(&self) -> Option<&'static str> {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidRedirect(_)
            | Self::UnsupportedResponseType(_)
            | Self::AccessDenied(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1")
            }
            Self::InvalidClient(_)
            | Self::InvalidGrant(_)
            | Self::ReuseDetected { .. }
            | Self::UnauthorizedClient(_)
            | Self::UnsupportedGrantType(_)
            | Self::InvalidScope(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2")
            }
            Self::InvalidToken(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6750#section-3.1")
            }
            _ => None,
        }
    }

    /// Convert into the wire representation
    #[must_use]
    pub fn to_response(&self) -> OAuth2ErrorResponse {
        OAuth2ErrorResponse {
            error: self.error_code().to_owned(),
            error_description: Some(self.public_description()),
            error_uri: self.error_uri().map(str::to_owned),
        }
    }
}

impl From<StorageError> for OAuth2Error {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Timeout { operation } => {
                tracing::error!("storage timeout during {operation}");
                Self::TemporarilyUnavailable("The authorization server is busy".to_owned())
            }
            other => {
                tracing::error!("storage failure: {other}");
                Self::ServerError(other.to_string())
            }
        }
    }
}

impl From<AppError> for OAuth2Error {
    fn from(error: AppError) -> Self {
        tracing::error!("internal failure: {error}");
        Self::ServerError(error.message)
    }
}

/// OAuth 2.0 error response body (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuth2ErrorResponse {
    /// Error code
    pub error: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI with more information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

#[cfg(feature = "http-response")]
mod http_response {
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use http::header::{CACHE_CONTROL, PRAGMA, WWW_AUTHENTICATE};
    use http::{HeaderValue, StatusCode};

    use super::OAuth2Error;

    impl IntoResponse for OAuth2Error {
        fn into_response(self) -> Response {
            let status =
                StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
            let challenge = match &self {
                Self::InvalidClient(_) => Some("Basic realm=\"tollgate\"".to_owned()),
                Self::InvalidToken(_) => Some(format!(
                    "Bearer realm=\"tollgate\", error=\"invalid_token\", error_description=\"{}\"",
                    self.public_description().replace('"', "'")
                )),
                _ => None,
            };

            let mut response = (status, Json(self.to_response())).into_response();
            let headers = response.headers_mut();
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
                headers.insert(WWW_AUTHENTICATE, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_detected_is_invalid_grant_on_the_wire() {
        let error = OAuth2Error::ReuseDetected {
            family_id: "fam".to_owned(),
        };
        assert_eq!(error.error_code(), "invalid_grant");
        assert_eq!(error.http_status(), 400);
        assert!(error.is_security_event());
    }

    #[test]
    fn test_client_and_redirect_errors_never_redirect() {
        assert!(!OAuth2Error::InvalidClient("x".to_owned()).is_redirectable());
        assert!(!OAuth2Error::InvalidRedirect("x".to_owned()).is_redirectable());
        assert!(OAuth2Error::InvalidScope("x".to_owned()).is_redirectable());
        assert!(OAuth2Error::ConsentRequired.is_redirectable());
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let response = OAuth2Error::KeyUnavailable("kid-7 expired".to_owned()).to_response();
        assert_eq!(response.error, "server_error");
        assert!(!response
            .error_description
            .unwrap_or_default()
            .contains("kid-7"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = OAuth2Error::InvalidGrant("code expired".to_owned()).to_response();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "invalid_grant");
        assert_eq!(json["error_description"], "code expired");
    }
}
