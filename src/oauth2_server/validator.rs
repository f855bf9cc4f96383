// ABOUTME: Authorization request validation: client, redirect URI, response type, scope, PKCE
// ABOUTME: Read-only; errors after the redirect URI check carry the target so they can be redirected
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::sync::Arc;

use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::{OAuth2Client, PkceMethod, ScopeSet};
use tracing::debug;

use super::client_registration::ClientRegistrationManager;
use super::models::AuthorizeRequest;
use crate::crypto::pkce;

/// OIDC `prompt` values understood by the authorization endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Never show UI; fail with `login_required` / `consent_required` instead
    None,
    /// Always show the consent screen
    Consent,
    /// Force re-authentication upstream
    Login,
}

impl Prompt {
    fn parse(raw: &str) -> Result<Option<Self>, OAuth2Error> {
        let mut prompt = None;
        for value in raw.split_whitespace() {
            let parsed = match value {
                "none" => Self::None,
                "consent" => Self::Consent,
                "login" => Self::Login,
                "select_account" => continue,
                other => {
                    return Err(OAuth2Error::InvalidRequest(format!(
                        "unsupported prompt value {other}"
                    )))
                }
            };
            if (parsed == Self::None && prompt.is_some()) || prompt == Some(Self::None) {
                return Err(OAuth2Error::InvalidRequest(
                    "prompt=none cannot be combined with other values".to_owned(),
                ));
            }
            prompt = Some(parsed);
        }
        Ok(prompt)
    }
}

/// Authorization request that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    /// Client making the request
    pub client: OAuth2Client,
    /// Exactly matched redirect URI
    pub redirect_uri: String,
    /// Requested scope (defaults to the client's allowed scope)
    pub scope: ScopeSet,
    /// Client state
    pub state: Option<String>,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE method; `Some` whenever a challenge is present
    pub code_challenge_method: Option<PkceMethod>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// OIDC prompt
    pub prompt: Option<Prompt>,
}

/// Where a redirectable error should be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Validated redirect URI
    pub redirect_uri: String,
    /// State to echo back
    pub state: Option<String>,
}

/// Rejected authorization request
#[derive(Debug)]
pub struct AuthorizationRejection {
    /// Why the request was rejected
    pub error: OAuth2Error,
    /// Present when the error may be delivered to the client's redirect URI
    pub redirect: Option<RedirectTarget>,
}

impl AuthorizationRejection {
    /// Rejection that must be shown to the user, never redirected
    #[must_use]
    pub const fn direct(error: OAuth2Error) -> Self {
        Self {
            error,
            redirect: None,
        }
    }

    /// Rejection delivered to the client
    #[must_use]
    pub fn redirect(error: OAuth2Error, target: RedirectTarget) -> Self {
        let redirect = error.is_redirectable().then_some(target);
        Self { error, redirect }
    }
}

impl From<OAuth2Error> for AuthorizationRejection {
    fn from(error: OAuth2Error) -> Self {
        Self::direct(error)
    }
}

/// Validator for authorization requests
pub struct AuthorizationRequestValidator {
    clients: Arc<ClientRegistrationManager>,
    require_pkce_for_confidential: bool,
}

impl AuthorizationRequestValidator {
    /// Create a validator
    #[must_use]
    pub const fn new(
        clients: Arc<ClientRegistrationManager>,
        require_pkce_for_confidential: bool,
    ) -> Self {
        Self {
            clients,
            require_pkce_for_confidential,
        }
    }

    /// Validate an authorization request. Performs no writes.
    ///
    /// Checks run in order: client, redirect URI, response type, scope, PKCE.
    ///
    /// # Errors
    ///
    /// Client and redirect errors are never redirectable; later errors carry the redirect target
    pub async fn validate(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<ValidatedAuthorization, AuthorizationRejection> {
        let client = match self.clients.get_client(&request.client_id).await {
            Ok(Some(client)) if !client.disabled => client,
            Ok(_) => {
                debug!(client_id = %request.client_id, "Authorization request from unknown or disabled client");
                return Err(AuthorizationRejection::direct(OAuth2Error::InvalidClient(
                    "Unknown or disabled client".to_owned(),
                )));
            }
            Err(e) => return Err(AuthorizationRejection::direct(e.into())),
        };

        let redirect_uri = Self::resolve_redirect_uri(&client, request.redirect_uri.as_deref())?;
        let target = RedirectTarget {
            redirect_uri: redirect_uri.clone(),
            state: request.state.clone(),
        };
        let reject = |error: OAuth2Error| AuthorizationRejection::redirect(error, target.clone());

        match request.response_type.as_deref() {
            Some("code") => {}
            Some(other) => {
                return Err(reject(OAuth2Error::UnsupportedResponseType(format!(
                    "response_type {other} is not supported"
                ))))
            }
            None => {
                return Err(reject(OAuth2Error::InvalidRequest(
                    "response_type is required".to_owned(),
                )))
            }
        }

        let scope = Self::resolve_scope(&client, request.scope.as_deref()).map_err(reject)?;
        let (code_challenge, code_challenge_method) = self
            .resolve_pkce(
                &client,
                request.code_challenge.as_deref(),
                request.code_challenge_method.as_deref(),
            )
            .map_err(reject)?;
        let prompt = request
            .prompt
            .as_deref()
            .map(Prompt::parse)
            .transpose()
            .map_err(reject)?
            .flatten();

        Ok(ValidatedAuthorization {
            client,
            redirect_uri,
            scope,
            state: request.state.clone(),
            code_challenge,
            code_challenge_method,
            nonce: request.nonce.clone(),
            prompt,
        })
    }

    fn resolve_redirect_uri(
        client: &OAuth2Client,
        requested: Option<&str>,
    ) -> Result<String, AuthorizationRejection> {
        match requested {
            Some(uri) if client.has_redirect_uri(uri) => Ok(uri.to_owned()),
            Some(_) => Err(AuthorizationRejection::direct(OAuth2Error::InvalidRedirect(
                "redirect_uri does not match a registered URI".to_owned(),
            ))),
            None => match client.redirect_uris.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(AuthorizationRejection::direct(OAuth2Error::InvalidRedirect(
                    "redirect_uri is required".to_owned(),
                ))),
            },
        }
    }

    fn resolve_scope(client: &OAuth2Client, requested: Option<&str>) -> Result<ScopeSet, OAuth2Error> {
        let scope = requested.map(ScopeSet::parse).unwrap_or_default();
        if scope.is_empty() {
            return Ok(client.allowed_scopes.clone());
        }
        let disallowed = scope.difference(&client.allowed_scopes);
        if disallowed.is_empty() {
            Ok(scope)
        } else {
            Err(OAuth2Error::InvalidScope(format!(
                "scope not allowed for this client: {}",
                disallowed.join(" ")
            )))
        }
    }

    fn resolve_pkce(
        &self,
        client: &OAuth2Client,
        challenge: Option<&str>,
        method: Option<&str>,
    ) -> Result<(Option<String>, Option<PkceMethod>), OAuth2Error> {
        let Some(challenge) = challenge else {
            if method.is_some() {
                return Err(OAuth2Error::InvalidRequest(
                    "code_challenge_method without code_challenge".to_owned(),
                ));
            }
            if client.is_public() || self.require_pkce_for_confidential {
                return Err(OAuth2Error::InvalidRequest(
                    "code_challenge is required".to_owned(),
                ));
            }
            return Ok((None, None));
        };

        let method = match method {
            None => PkceMethod::Plain,
            Some(raw) => PkceMethod::parse(raw).ok_or_else(|| {
                OAuth2Error::InvalidRequest(format!("unsupported code_challenge_method {raw}"))
            })?,
        };
        if method == PkceMethod::Plain && client.is_public() {
            return Err(OAuth2Error::InvalidRequest(
                "public clients must use code_challenge_method=S256".to_owned(),
            ));
        }
        if !pkce::is_well_formed(challenge) {
            return Err(OAuth2Error::InvalidRequest(
                "code_challenge must be 43-128 unreserved characters".to_owned(),
            ));
        }
        Ok((Some(challenge.to_owned()), Some(method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_parsing() {
        assert_eq!(Prompt::parse("none").unwrap(), Some(Prompt::None));
        assert_eq!(Prompt::parse("login consent").unwrap(), Some(Prompt::Consent));
        assert!(Prompt::parse("none consent").is_err());
        assert!(Prompt::parse("bogus").is_err());
    }
}
