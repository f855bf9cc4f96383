// ABOUTME: OAuth 2.0 / OIDC wire models for authorize, token, registration, revocation, introspection
// ABOUTME: Implements RFC 6749, RFC 7591, RFC 7009, RFC 7662, and OIDC Discovery request/response shapes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth 2.0 Authorization Request (query parameters of `/authorize`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeRequest {
    /// Response type (only `code` is supported)
    pub response_type: Option<String>,
    /// Client identifier
    #[serde(default)]
    pub client_id: String,
    /// Redirect URI; optional when the client registered exactly one
    pub redirect_uri: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (`S256` or `plain`)
    pub code_challenge_method: Option<String>,
    /// OIDC nonce copied into the ID token
    pub nonce: Option<String>,
    /// OIDC prompt (`none`, `consent`, `login`)
    pub prompt: Option<String>,
}

/// OAuth 2.0 Token Request (form body of `/token`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    /// Grant type (`authorization_code`, `refresh_token`, `client_credentials`)
    #[serde(default)]
    pub grant_type: String,
    /// Authorization code
    pub code: Option<String>,
    /// Redirect URI used in the authorization request
    pub redirect_uri: Option<String>,
    /// PKCE code verifier
    pub code_verifier: Option<String>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Requested scope (narrowing on refresh, or client-credentials scope)
    pub scope: Option<String>,
    /// Client id (`client_secret_post` or public clients)
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`)
    pub client_secret: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token (RS256 JWT)
    pub access_token: String,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Opaque refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `OpenID` Connect ID token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Granted scope
    pub scope: String,
}

/// Client credentials extracted from the token, revoke, or introspect request
#[derive(Debug, Clone, Default)]
pub struct ClientCredentials {
    /// Client id
    pub client_id: String,
    /// Client secret; `None` for public clients
    pub client_secret: Option<String>,
}

/// OAuth 2.0 Client Registration Request (RFC 7591)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientRegistrationRequest {
    /// Redirect URIs for the authorization code flow
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Display name
    pub client_name: Option<String>,
    /// Grant types the client will use
    pub grant_types: Option<Vec<String>>,
    /// Response types the client will use
    pub response_types: Option<Vec<String>>,
    /// Space-delimited scopes the client may request
    pub scope: Option<String>,
    /// `none`, `client_secret_basic`, or `client_secret_post`
    pub token_endpoint_auth_method: Option<String>,
}

/// OAuth 2.0 Client Registration Response (RFC 7591)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    /// Issued client id
    pub client_id: String,
    /// Issued secret, returned exactly once; absent for public clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Issue time (unix seconds)
    pub client_id_issued_at: i64,
    /// Secret expiry (0 = never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Allowed grant types
    pub grant_types: Vec<String>,
    /// Allowed response types
    pub response_types: Vec<String>,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Allowed scope
    pub scope: String,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: String,
}

/// Token Revocation Request (RFC 7009)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RevokeRequest {
    /// Token to revoke
    #[serde(default)]
    pub token: String,
    /// `access_token` or `refresh_token`
    pub token_type_hint: Option<String>,
    /// Client id (`client_secret_post` or public clients)
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`)
    pub client_secret: Option<String>,
}

/// Token Introspection Request (RFC 7662)
pub type IntrospectRequest = RevokeRequest;

/// Token Introspection Response (RFC 7662)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active
    pub active: bool,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// `access_token` or `refresh_token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    /// `{"active": false}`
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Consent page submission
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsentSubmission {
    /// Pending request id
    pub consent_id: String,
    /// Whether the user approved
    #[serde(default)]
    pub accept: bool,
}

/// Where the browser goes after a consent decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRedirect {
    /// Client redirect URI with `code` or `error=access_denied`
    pub redirect_uri: String,
}

/// Pending request shown on the consent page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentPrompt {
    /// Pending request id
    pub consent_id: String,
    /// Requesting client
    pub client_id: String,
    /// Client display name
    pub client_name: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Where the user will be sent
    pub redirect_uri: String,
    /// When the pending request lapses
    pub expires_at: DateTime<Utc>,
}

/// Authorization server metadata (RFC 8414 / OIDC Discovery 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// `/authorize`
    pub authorization_endpoint: String,
    /// `/token`
    pub token_endpoint: String,
    /// `/userinfo`
    pub userinfo_endpoint: String,
    /// `/.well-known/jwks.json`
    pub jwks_uri: String,
    /// `/oauth2/register`
    pub registration_endpoint: String,
    /// `/oauth2/revoke`
    pub revocation_endpoint: String,
    /// `/oauth2/introspect`
    pub introspection_endpoint: String,
    /// Supported response types
    pub response_types_supported: Vec<String>,
    /// Supported grant types
    pub grant_types_supported: Vec<String>,
    /// Supported subject types
    pub subject_types_supported: Vec<String>,
    /// ID token signing algorithms
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Scopes
    pub scopes_supported: Vec<String>,
    /// Client authentication methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
    /// Claims available at userinfo
    pub claims_supported: Vec<String>,
}
