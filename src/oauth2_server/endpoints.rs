// ABOUTME: OAuth 2.0 / OIDC authorization server facade behind the HTTP routes
// ABOUTME: Orchestrates validation, consent, code issuance, token grants, revocation, and introspection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::sync::Arc;

use tollgate_core::constants::{auth_methods, grant_types, keys, token_type_hints};
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::{
    ConsentDecision, OAuth2Client, PendingAuthorization, RefreshTokenRecord, ScopeSet, TokenPair,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::auth_codes::{AuthorizationCodeStore, CodeGrant};
use super::client_registration::ClientRegistrationManager;
use super::consent::ConsentLedger;
use super::hooks::OAuth2Hooks;
use super::models::{
    AuthorizeRequest, ClientCredentials, ClientRegistrationRequest, ClientRegistrationResponse,
    ConsentPrompt, ConsentRedirect, ConsentSubmission, IntrospectRequest, IntrospectionResponse,
    RevokeRequest, ServerMetadata, TokenRequest, TokenResponse,
};
use super::revocation::{reasons, RevocationRegistry};
use super::token_issuer::TokenIssuer;
use super::userinfo::{self, UserInfoResponse};
use super::validator::{AuthorizationRequestValidator, Prompt, RedirectTarget};
use crate::auth::{authenticate_bearer, AccessTokenClaims};
use crate::clock::SharedClock;
use crate::config::ServerConfig;
use crate::crypto::hash_opaque_token;
use crate::jwks::JsonWebKeySet;
use crate::key_management::KeyManager;
use crate::storage::SharedStore;

/// Where the user agent goes after `/authorize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Back to the client, carrying either a code or an error
    Redirect(String),
    /// To the consent page for a parked request
    Consent(String),
    /// To the login page; the request is retried after authentication
    Login(String),
}

impl AuthorizeOutcome {
    /// Target of the 302
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Redirect(location) | Self::Consent(location) | Self::Login(location) => location,
        }
    }
}

/// Components wired into the authorization server
pub struct AuthorizationServerComponents {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Time source
    pub clock: SharedClock,
    /// Storage
    pub store: SharedStore,
    /// Client registry
    pub clients: Arc<ClientRegistrationManager>,
    /// Consent ledger
    pub consent: Arc<ConsentLedger>,
    /// Authorization codes
    pub codes: Arc<AuthorizationCodeStore>,
    /// Token issuer
    pub tokens: Arc<TokenIssuer>,
    /// Signing keys
    pub keys: Arc<KeyManager>,
    /// Family revocation
    pub revocation: Arc<RevocationRegistry>,
    /// Extension hooks
    pub hooks: Arc<OAuth2Hooks>,
}

/// OAuth 2.0 Authorization Server
pub struct OAuth2AuthorizationServer {
    c: AuthorizationServerComponents,
    validator: AuthorizationRequestValidator,
}

impl OAuth2AuthorizationServer {
    /// Assemble the server from its components
    #[must_use]
    pub fn new(components: AuthorizationServerComponents) -> Self {
        let validator = AuthorizationRequestValidator::new(
            components.clients.clone(),
            components.config.require_pkce_for_confidential,
        );
        Self {
            c: components,
            validator,
        }
    }

    /// Client registry
    #[must_use]
    pub const fn clients(&self) -> &Arc<ClientRegistrationManager> {
        &self.c.clients
    }

    /// Consent ledger
    #[must_use]
    pub const fn consent(&self) -> &Arc<ConsentLedger> {
        &self.c.consent
    }

    /// Signing keys
    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyManager> {
        &self.c.keys
    }

    /// Family revocation
    #[must_use]
    pub const fn revocation(&self) -> &Arc<RevocationRegistry> {
        &self.c.revocation
    }

    /// Token issuer
    #[must_use]
    pub const fn tokens(&self) -> &Arc<TokenIssuer> {
        &self.c.tokens
    }

    /// Handle `GET /authorize`.
    ///
    /// `user_id` is the end user asserted by the upstream authenticator, if any. `request_uri`
    /// is the original request target, used as the login page's `return_to`.
    ///
    /// # Errors
    ///
    /// Returns the error to render as a local page when no redirect URI can be trusted
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        user_id: Option<&str>,
        request_uri: &str,
    ) -> Result<AuthorizeOutcome, OAuth2Error> {
        let validated = match self.validator.validate(request).await {
            Ok(validated) => validated,
            Err(rejection) => {
                return match rejection.redirect {
                    Some(target) => Ok(AuthorizeOutcome::Redirect(error_redirect(
                        &target,
                        &rejection.error,
                    )?)),
                    None => Err(rejection.error),
                };
            }
        };
        let target = RedirectTarget {
            redirect_uri: validated.redirect_uri.clone(),
            state: validated.state.clone(),
        };
        let redirect_error =
            |error: OAuth2Error| error_redirect(&target, &error).map(AuthorizeOutcome::Redirect);

        let validated = match self.c.hooks.authorize.run(validated) {
            Ok(validated) => validated,
            Err(error) => return redirect_error(error),
        };

        let Some(user_id) = user_id else {
            if validated.prompt == Some(Prompt::None) {
                return redirect_error(OAuth2Error::LoginRequired);
            }
            debug!(client_id = %validated.client.client_id, "Unauthenticated authorization request");
            return Ok(AuthorizeOutcome::Login(with_query(
                &self.c.config.login_url,
                &[("return_to", request_uri)],
            )?));
        };

        let decision = if validated.prompt == Some(Prompt::Consent) && !validated.client.trusted {
            ConsentDecision::Show
        } else {
            self.c
                .consent
                .check_consent(user_id, &validated.client, &validated.scope)
                .await?
        };

        let auth_time = self.c.clock.now();
        if decision.requires_interaction() {
            if validated.prompt == Some(Prompt::None) {
                return redirect_error(OAuth2Error::ConsentRequired);
            }
            let pending = self
                .c
                .consent
                .create_pending(&validated, user_id, auth_time)
                .await?;
            info!(
                client_id = %validated.client.client_id,
                user_id,
                decision = ?decision,
                "Consent required"
            );
            return Ok(AuthorizeOutcome::Consent(with_query(
                &self.c.config.consent_url,
                &[("consent_id", pending.consent_id.as_str())],
            )?));
        }

        let code = self
            .c
            .codes
            .issue(CodeGrant {
                client_id: validated.client.client_id.clone(),
                user_id: user_id.to_owned(),
                redirect_uri: validated.redirect_uri.clone(),
                scope: validated.scope.clone(),
                code_challenge: validated.code_challenge.clone(),
                code_challenge_method: validated.code_challenge_method,
                nonce: validated.nonce.clone(),
                auth_time,
            })
            .await;
        match code {
            Ok(code) => Ok(AuthorizeOutcome::Redirect(code_redirect(&target, &code)?)),
            Err(error) => redirect_error(error),
        }
    }

    /// Describe a parked request to its owner
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for unknown, expired, or foreign consent ids
    pub async fn consent_prompt(
        &self,
        consent_id: &str,
        user_id: &str,
    ) -> Result<ConsentPrompt, OAuth2Error> {
        let pending = self.c.consent.pending(consent_id, user_id).await?;
        let client = self.active_client(&pending.client_id).await?;
        Ok(ConsentPrompt {
            consent_id: pending.consent_id,
            client_id: client.client_id.clone(),
            client_name: client.display_name().to_owned(),
            scopes: pending.scope.iter().map(str::to_owned).collect(),
            redirect_uri: pending.redirect_uri,
            expires_at: pending.expires_at,
        })
    }

    /// Apply the user's consent decision. The pending request is single-use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for unknown, expired, reused, or foreign consent ids
    pub async fn submit_consent(
        &self,
        submission: &ConsentSubmission,
        user_id: &str,
    ) -> Result<ConsentRedirect, OAuth2Error> {
        let pending = self
            .c
            .consent
            .take_pending(&submission.consent_id, user_id)
            .await?;
        let client = self.active_client(&pending.client_id).await?;
        let target = RedirectTarget {
            redirect_uri: pending.redirect_uri.clone(),
            state: pending.state.clone(),
        };

        let recorded = self
            .c
            .consent
            .record_consent(user_id, &client.client_id, &pending.scope, submission.accept)
            .await;
        let redirect_uri = match recorded {
            Ok(()) => match self.issue_code_for(&pending).await {
                Ok(code) => code_redirect(&target, &code)?,
                Err(error) => error_redirect(&target, &error)?,
            },
            Err(error @ OAuth2Error::AccessDenied(_)) => error_redirect(&target, &error)?,
            Err(error) => return Err(error),
        };
        Ok(ConsentRedirect { redirect_uri })
    }

    async fn issue_code_for(&self, pending: &PendingAuthorization) -> Result<String, OAuth2Error> {
        self.c
            .codes
            .issue(CodeGrant {
                client_id: pending.client_id.clone(),
                user_id: pending.user_id.clone(),
                redirect_uri: pending.redirect_uri.clone(),
                scope: pending.scope.clone(),
                code_challenge: pending.code_challenge.clone(),
                code_challenge_method: pending.code_challenge_method,
                nonce: pending.nonce.clone(),
                auth_time: pending.auth_time,
            })
            .await
    }

    async fn active_client(
        &self,
        client_id: &str,
    ) -> Result<OAuth2Client, OAuth2Error> {
        match self.c.clients.get_client(client_id).await? {
            Some(client) if !client.disabled => Ok(client),
            _ => Err(OAuth2Error::InvalidClient(
                "Unknown or disabled client".to_owned(),
            )),
        }
    }

    /// Handle `POST /token`
    ///
    /// # Errors
    ///
    /// Returns the protocol error for the failed grant
    pub async fn token(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<TokenResponse, OAuth2Error> {
        let client = self
            .c
            .clients
            .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
            .await?;
        let requested_scope = request.scope.as_deref().map(ScopeSet::parse);

        let pair = match request.grant_type.as_str() {
            grant_types::AUTHORIZATION_CODE => {
                let code = required(request.code.as_deref(), "code")?;
                self.c
                    .tokens
                    .exchange_code(
                        code,
                        request.redirect_uri.as_deref(),
                        request.code_verifier.as_deref(),
                        &client,
                    )
                    .await?
            }
            grant_types::REFRESH_TOKEN => {
                let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
                self.c
                    .tokens
                    .exchange_refresh_token(refresh_token, &client, requested_scope.as_ref())
                    .await?
            }
            grant_types::CLIENT_CREDENTIALS => {
                self.c
                    .tokens
                    .issue_client_credentials(&client, requested_scope.as_ref())
                    .await?
            }
            "" => {
                return Err(OAuth2Error::InvalidRequest(
                    "grant_type is required".to_owned(),
                ))
            }
            other => {
                return Err(OAuth2Error::UnsupportedGrantType(format!(
                    "grant_type {other} is not supported"
                )))
            }
        };
        Ok(self.token_response(pair))
    }

    fn token_response(&self, pair: TokenPair) -> TokenResponse {
        TokenResponse {
            expires_in: (pair.access_expires_at - self.c.clock.now()).num_seconds(),
            access_token: pair.access_token,
            token_type: "Bearer".to_owned(),
            refresh_token: pair.refresh_token,
            id_token: pair.id_token,
            scope: pair.scope.to_string(),
        }
    }

    /// Verify a bearer token for a protected resource
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for invalid, expired, or revoked tokens
    pub async fn authenticate_bearer(&self, token: &str) -> Result<AccessTokenClaims, OAuth2Error> {
        authenticate_bearer(&self.c.keys, &self.c.revocation, token).await
    }

    /// Handle `/userinfo`
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for a rejected bearer token
    pub async fn userinfo(&self, bearer: &str) -> Result<UserInfoResponse, OAuth2Error> {
        let claims = self.authenticate_bearer(bearer).await?;
        userinfo::userinfo(&self.c.store, &claims).await
    }

    /// Handle `POST /oauth2/revoke` (RFC 7009). Unknown tokens are not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` when client authentication fails
    pub async fn revoke(
        &self,
        request: &RevokeRequest,
        credentials: &ClientCredentials,
    ) -> Result<(), OAuth2Error> {
        let client = self
            .c
            .clients
            .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
            .await?;
        if request.token.is_empty() {
            return Err(OAuth2Error::InvalidRequest("token is required".to_owned()));
        }

        let located = self
            .locate_token(&request.token, request.token_type_hint.as_deref())
            .await?;
        let family = match located.as_ref().map(LocatedToken::owner) {
            Some((family_id, owner)) if owner == client.client_id => Some(family_id),
            Some(_) => {
                warn!(client_id = %client.client_id, "Client tried to revoke another client's token");
                None
            }
            None => None,
        };
        if let Some(family_id) = family {
            self.c
                .revocation
                .revoke_family(family_id, reasons::CLIENT_REQUEST)
                .await?;
        }
        Ok(())
    }

    /// Handle `POST /oauth2/introspect` (RFC 7662). Only confidential clients may introspect.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` when the caller is not an authenticated confidential client
    pub async fn introspect(
        &self,
        request: &IntrospectRequest,
        credentials: &ClientCredentials,
    ) -> Result<IntrospectionResponse, OAuth2Error> {
        let client = self
            .c
            .clients
            .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
            .await?;
        if client.is_public() {
            return Err(OAuth2Error::InvalidClient(
                "introspection requires a confidential client".to_owned(),
            ));
        }

        let Some(located) = self
            .locate_token(&request.token, request.token_type_hint.as_deref())
            .await?
        else {
            return Ok(IntrospectionResponse::inactive());
        };
        let now = self.c.clock.now();

        Ok(match located {
            LocatedToken::Refresh { client_id, record, .. } => {
                let active = record.consumed_at.is_none()
                    && !record.is_expired(now)
                    && !self.c.revocation.is_revoked(record.token_id).await?;
                if !active {
                    return Ok(IntrospectionResponse::inactive());
                }
                IntrospectionResponse {
                    active: true,
                    scope: Some(record.scope.to_string()),
                    client_id: Some(client_id),
                    sub: Some(record.user_id.clone()),
                    exp: Some(record.expires_at.timestamp()),
                    iat: Some(record.issued_at.timestamp()),
                    token_type: Some(token_type_hints::REFRESH_TOKEN.to_owned()),
                    iss: Some(self.c.config.issuer.clone()),
                }
            }
            LocatedToken::Access {
                family_id,
                client_id,
                claims,
            } => {
                if self.c.revocation.is_family_revoked(family_id).await? {
                    return Ok(IntrospectionResponse::inactive());
                }
                IntrospectionResponse {
                    active: true,
                    scope: Some(claims.scope),
                    client_id: Some(client_id),
                    sub: Some(claims.sub),
                    exp: Some(claims.exp),
                    iat: Some(claims.iat),
                    token_type: Some("Bearer".to_owned()),
                    iss: Some(claims.iss),
                }
            }
        })
    }

    async fn locate_token(
        &self,
        token: &str,
        hint: Option<&str>,
    ) -> Result<Option<LocatedToken>, OAuth2Error> {
        if hint == Some(token_type_hints::ACCESS_TOKEN) {
            if let Some(found) = self.locate_access_token(token).await {
                return Ok(Some(found));
            }
            return self.locate_refresh_token(token).await;
        }
        if let Some(found) = self.locate_refresh_token(token).await? {
            return Ok(Some(found));
        }
        Ok(self.locate_access_token(token).await)
    }

    async fn locate_refresh_token(&self, token: &str) -> Result<Option<LocatedToken>, OAuth2Error> {
        Ok(self
            .c
            .store
            .find_refresh_token(&hash_opaque_token(token))
            .await?
            .map(|record| LocatedToken::Refresh {
                family_id: record.family_id,
                client_id: record.client_id.clone(),
                record: Box::new(record),
            }))
    }

    async fn locate_access_token(&self, token: &str) -> Option<LocatedToken> {
        let claims: AccessTokenClaims = self.c.keys.verify(token, None).await.ok()?;
        Some(LocatedToken::Access {
            family_id: claims.fid,
            client_id: claims.client_id.clone(),
            claims: Box::new(claims),
        })
    }

    /// Handle `POST /oauth2/register`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for unacceptable client metadata
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        self.c.clients.register(request).await
    }

    /// Public signing keys
    pub async fn jwks(&self) -> JsonWebKeySet {
        self.c.keys.public_jwks().await
    }

    /// Discovery document (RFC 8414 / OIDC Discovery 1.0)
    #[must_use]
    pub fn metadata(&self) -> ServerMetadata {
        let config = &self.c.config;
        let strings = |values: &[&str]| values.iter().map(|v| (*v).to_owned()).collect();
        ServerMetadata {
            issuer: config.issuer.clone(),
            authorization_endpoint: config.endpoint("/authorize"),
            token_endpoint: config.endpoint("/token"),
            userinfo_endpoint: config.endpoint("/userinfo"),
            jwks_uri: config.endpoint("/.well-known/jwks.json"),
            registration_endpoint: config.endpoint("/oauth2/register"),
            revocation_endpoint: config.endpoint("/oauth2/revoke"),
            introspection_endpoint: config.endpoint("/oauth2/introspect"),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&[
                grant_types::AUTHORIZATION_CODE,
                grant_types::REFRESH_TOKEN,
                grant_types::CLIENT_CREDENTIALS,
            ]),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: strings(&[keys::SIGNING_ALGORITHM]),
            scopes_supported: config.scopes_supported.iter().map(str::to_owned).collect(),
            token_endpoint_auth_methods_supported: strings(&[
                auth_methods::CLIENT_SECRET_BASIC,
                auth_methods::CLIENT_SECRET_POST,
                auth_methods::NONE,
            ]),
            code_challenge_methods_supported: strings(&["S256", "plain"]),
            claims_supported: strings(&[
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "auth_time",
                "nonce",
                "at_hash",
                "name",
                "given_name",
                "family_name",
                "picture",
                "updated_at",
                "email",
                "email_verified",
            ]),
        }
    }
}

/// A presented token resolved to its family
enum LocatedToken {
    Refresh {
        family_id: Uuid,
        client_id: String,
        record: Box<RefreshTokenRecord>,
    },
    Access {
        family_id: Uuid,
        client_id: String,
        claims: Box<AccessTokenClaims>,
    },
}

impl LocatedToken {
    fn owner(&self) -> (Uuid, &str) {
        match self {
            Self::Refresh {
                family_id,
                client_id,
                ..
            }
            | Self::Access {
                family_id,
                client_id,
                ..
            } => (*family_id, client_id),
        }
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuth2Error> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuth2Error::InvalidRequest(format!("{name} is required")))
}

fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, OAuth2Error> {
    let mut url = Url::parse(base)
        .map_err(|e| OAuth2Error::ServerError(format!("invalid redirect base {base}: {e}")))?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.into())
}

fn code_redirect(target: &RedirectTarget, code: &str) -> Result<String, OAuth2Error> {
    let mut params = vec![("code", code)];
    if let Some(state) = target.state.as_deref() {
        params.push(("state", state));
    }
    with_query(&target.redirect_uri, &params)
}

/// Redirect carrying `error`, `error_description`, and `state` (RFC 6749 §4.1.2.1)
fn error_redirect(target: &RedirectTarget, error: &OAuth2Error) -> Result<String, OAuth2Error> {
    let description = error.public_description();
    let mut params = vec![
        ("error", error.error_code()),
        ("error_description", description.as_str()),
    ];
    if let Some(state) = target.state.as_deref() {
        params.push(("state", state));
    }
    with_query(&target.redirect_uri, &params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(state: Option<&str>) -> RedirectTarget {
        RedirectTarget {
            redirect_uri: "https://app.example.com/cb?tenant=a".to_owned(),
            state: state.map(str::to_owned),
        }
    }

    #[test]
    fn test_code_redirect_keeps_existing_query_and_state() {
        let location = code_redirect(&target(Some("xyz")), "abc").unwrap();
        let url = Url::parse(&location).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("tenant".to_owned(), "a".to_owned()),
                ("code".to_owned(), "abc".to_owned()),
                ("state".to_owned(), "xyz".to_owned()),
            ]
        );
    }

    #[test]
    fn test_error_redirect_uses_wire_code() {
        let location = error_redirect(&target(None), &OAuth2Error::ConsentRequired).unwrap();
        let url = Url::parse(&location).unwrap();
        let error = url
            .query_pairs()
            .find(|(k, _)| k == "error")
            .map(|(_, v)| v.into_owned());
        assert_eq!(error.as_deref(), Some("consent_required"));
        assert!(url.query_pairs().all(|(k, _)| k != "state"));
    }
}
