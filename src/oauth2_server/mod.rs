// ABOUTME: OAuth 2.0 / OpenID Connect authorization server: validation, consent, codes, tokens
// ABOUTME: Provides the token engine components and the facade consumed by the HTTP routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

/// Single-use authorization codes
pub mod auth_codes;
/// RFC 7591 dynamic client registration and client authentication
pub mod client_registration;
/// Per-user, per-client consent ledger
pub mod consent;
/// Authorization server facade
pub mod endpoints;
/// Extension hooks
pub mod hooks;
/// OAuth 2.0 data models and types
pub mod models;
/// Rate limiting for OAuth 2.0 endpoints
pub mod rate_limiting;
/// Token family revocation
pub mod revocation;
/// Token issuance and refresh rotation
pub mod token_issuer;
/// OIDC userinfo claims
pub mod userinfo;
/// Authorization request validation
pub mod validator;

pub use auth_codes::{AuthorizationCodeStore, CodeGrant};
pub use client_registration::ClientRegistrationManager;
pub use consent::ConsentLedger;
pub use endpoints::{AuthorizationServerComponents, AuthorizeOutcome, OAuth2AuthorizationServer};
pub use hooks::{HookPipeline, OAuth2Hooks, TokenContext};
pub use rate_limiting::{OAuth2RateLimitStatus, OAuth2RateLimiter, RateLimitedEndpoint};
pub use revocation::RevocationRegistry;
pub use token_issuer::{TokenIssuer, TokenIssuerDeps};
pub use validator::{AuthorizationRequestValidator, ValidatedAuthorization};
