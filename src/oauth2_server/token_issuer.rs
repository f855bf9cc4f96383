// ABOUTME: Token issuance for the code, refresh, and client-credentials grants
// ABOUTME: Refresh tokens rotate on every use; presenting a rotated token revokes the whole family
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! # Token Issuer
//!
//! Every refresh token belongs to a family started by one authorization code. Rotation is a
//! single conditional update in the store: exactly one concurrent caller consumes a given
//! refresh token. Any later presentation of that token is treated as theft and revokes the
//! family, which also invalidates the family's access tokens through their `fid` claim.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tollgate_core::constants::grant_types;
use tollgate_core::constants::scopes::OPENID;
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::{
    ConsumeOutcome, OAuth2Client, RefreshTokenRecord, ScopeSet, TokenFamily, TokenPair,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::auth_codes::AuthorizationCodeStore;
use super::hooks::{OAuth2Hooks, TokenContext};
use super::revocation::{reasons, RevocationRegistry};
use crate::auth::{access_token_hash, AccessTokenClaims, IdTokenClaims, RESERVED_CLAIMS};
use crate::clock::SharedClock;
use crate::config::TokenLifetimes;
use crate::crypto::{generate_opaque_token, hash_opaque_token};
use crate::key_management::KeyManager;
use crate::notifications::{SecurityEvent, SharedEventSink};
use crate::storage::SharedStore;

/// Collaborators of the token issuer
pub struct TokenIssuerDeps {
    /// Storage
    pub store: SharedStore,
    /// Time source
    pub clock: SharedClock,
    /// Signing keys
    pub keys: Arc<KeyManager>,
    /// Authorization codes
    pub codes: Arc<AuthorizationCodeStore>,
    /// Family revocation
    pub revocation: Arc<RevocationRegistry>,
    /// Security events
    pub events: SharedEventSink,
    /// Extension hooks
    pub hooks: Arc<OAuth2Hooks>,
}

/// Token issuer
pub struct TokenIssuer {
    deps: TokenIssuerDeps,
    issuer: String,
    lifetimes: TokenLifetimes,
}

/// Per-issuance inputs not covered by [`TokenContext`]
struct Issuance {
    auth_time: DateTime<Utc>,
    nonce: Option<String>,
    rotated_from: Option<Uuid>,
    with_refresh: bool,
}

impl TokenIssuer {
    /// Create an issuer for `issuer` (the `iss` claim)
    #[must_use]
    pub const fn new(deps: TokenIssuerDeps, issuer: String, lifetimes: TokenLifetimes) -> Self {
        Self {
            deps,
            issuer,
            lifetimes,
        }
    }

    /// Exchange an authorization code for a token pair, starting a new family.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for any code problem, `UnauthorizedClient` when the client may not
    /// use this grant, or `KeyUnavailable` when nothing can sign (the code stays consumed)
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
        client: &OAuth2Client,
    ) -> Result<TokenPair, OAuth2Error> {
        if !client.allows_grant(grant_types::AUTHORIZATION_CODE) {
            return Err(OAuth2Error::UnauthorizedClient(
                "client may not use the authorization_code grant".to_owned(),
            ));
        }
        let record = self
            .deps
            .codes
            .redeem(code, client, redirect_uri, code_verifier)
            .await?;

        let family = TokenFamily {
            family_id: Uuid::new_v4(),
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            code_hash: Some(record.code_hash.clone()),
            created_at: self.deps.clock.now(),
            revoked_at: None,
            revoked_reason: None,
        };
        self.deps.store.create_family(&family).await?;

        let context = TokenContext {
            grant_type: grant_types::AUTHORIZATION_CODE.to_owned(),
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            scope: record.scope.clone(),
            family_id: family.family_id,
        };
        let pair = self
            .issue(
                context,
                Issuance {
                    auth_time: record.auth_time,
                    nonce: record.nonce.clone(),
                    rotated_from: None,
                    with_refresh: client.allows_grant(grant_types::REFRESH_TOKEN),
                },
            )
            .await?;

        // A replay that landed between consume and create_family found no family to revoke
        if self.deps.codes.was_replayed(&record.code_hash).await? {
            self.deps
                .revocation
                .revoke_family(family.family_id, reasons::CODE_REPLAY)
                .await?;
            return Err(OAuth2Error::InvalidGrant(
                "Authorization code already used".to_owned(),
            ));
        }

        info!(
            client_id = %pair.client_id,
            user_id = %pair.user_id,
            family_id = %pair.refresh_token_family,
            "Issued tokens for authorization code"
        );
        Ok(pair)
    }

    /// Rotate a refresh token.
    ///
    /// # Errors
    ///
    /// - `ReuseDetected` when the token was already rotated (the family is revoked first)
    /// - `InvalidGrant` for unknown, expired, revoked, or foreign tokens
    /// - `InvalidScope` when the requested scope exceeds the token's scope
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        client: &OAuth2Client,
        requested_scope: Option<&ScopeSet>,
    ) -> Result<TokenPair, OAuth2Error> {
        if !client.allows_grant(grant_types::REFRESH_TOKEN) {
            return Err(OAuth2Error::UnauthorizedClient(
                "client may not use the refresh_token grant".to_owned(),
            ));
        }
        let token_hash = hash_opaque_token(refresh_token);

        // Rejections here leave the token unconsumed. A revocation by a concurrent loser never
        // fails the caller that won the consume.
        if let Some(current) = self.deps.store.find_refresh_token(&token_hash).await? {
            if current.consumed_at.is_none() {
                if current.client_id != client.client_id {
                    warn!(
                        token_client = %current.client_id,
                        presenting_client = %client.client_id,
                        "Refresh token presented by another client"
                    );
                    return Err(OAuth2Error::InvalidGrant(
                        "Refresh token was issued to another client".to_owned(),
                    ));
                }
                if requested_scope.is_some_and(|requested| !requested.is_subset_of(&current.scope)) {
                    return Err(OAuth2Error::InvalidScope(
                        "requested scope exceeds the original grant".to_owned(),
                    ));
                }
                if self.deps.revocation.is_revoked(current.token_id).await? {
                    return Err(OAuth2Error::InvalidGrant(
                        "Refresh token has been revoked".to_owned(),
                    ));
                }
            }
        }

        let now = self.deps.clock.now();
        let record = match self
            .deps
            .store
            .consume_refresh_token(&token_hash, now)
            .await?
        {
            ConsumeOutcome::Consumed(record) => record,
            ConsumeOutcome::NotFound => {
                return Err(OAuth2Error::InvalidGrant("Unknown refresh token".to_owned()))
            }
            ConsumeOutcome::AlreadyConsumed(record) => {
                return Err(self.handle_reuse(&record, client).await);
            }
        };

        if record.is_expired(now) {
            return Err(OAuth2Error::InvalidGrant("Refresh token expired".to_owned()));
        }
        if record.client_id != client.client_id {
            warn!(
                token_client = %record.client_id,
                presenting_client = %client.client_id,
                "Refresh token presented by another client"
            );
            return Err(OAuth2Error::InvalidGrant(
                "Refresh token was issued to another client".to_owned(),
            ));
        }
        let scope = match requested_scope {
            Some(requested) if !requested.is_subset_of(&record.scope) => {
                return Err(OAuth2Error::InvalidScope(
                    "requested scope exceeds the original grant".to_owned(),
                ))
            }
            Some(requested) if !requested.is_empty() => requested.clone(),
            _ => record.scope.clone(),
        };

        let context = TokenContext {
            grant_type: grant_types::REFRESH_TOKEN.to_owned(),
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            scope,
            family_id: record.family_id,
        };
        let pair = self
            .issue(
                context,
                Issuance {
                    auth_time: record.auth_time,
                    nonce: None,
                    rotated_from: Some(record.token_id),
                    with_refresh: true,
                },
            )
            .await?;

        info!(
            client_id = %pair.client_id,
            family_id = %pair.refresh_token_family,
            "Rotated refresh token"
        );
        Ok(pair)
    }

    async fn handle_reuse(
        &self,
        record: &RefreshTokenRecord,
        client: &OAuth2Client,
    ) -> OAuth2Error {
        warn!(
            family_id = %record.family_id,
            client_id = %record.client_id,
            presenting_client = %client.client_id,
            "Refresh token reuse detected; revoking family"
        );
        if let Err(e) = self
            .deps
            .revocation
            .revoke_family(record.family_id, reasons::REFRESH_TOKEN_REUSE)
            .await
        {
            return e.into();
        }
        self.deps
            .events
            .emit(SecurityEvent::RefreshTokenReuse {
                family_id: record.family_id,
                client_id: record.client_id.clone(),
                user_id: record.user_id.clone(),
            })
            .await;
        OAuth2Error::ReuseDetected {
            family_id: record.family_id.to_string(),
        }
    }

    /// Issue an access token to a confidential client acting on its own behalf
    ///
    /// # Errors
    ///
    /// Returns `UnauthorizedClient` for public clients or clients without the grant, and
    /// `InvalidScope` for scope outside the client's allowed set
    pub async fn issue_client_credentials(
        &self,
        client: &OAuth2Client,
        requested_scope: Option<&ScopeSet>,
    ) -> Result<TokenPair, OAuth2Error> {
        if client.is_public() || !client.allows_grant(grant_types::CLIENT_CREDENTIALS) {
            return Err(OAuth2Error::UnauthorizedClient(
                "client may not use the client_credentials grant".to_owned(),
            ));
        }
        let scope = match requested_scope {
            Some(requested) if !requested.is_empty() => {
                let disallowed = requested.difference(&client.allowed_scopes);
                if !disallowed.is_empty() {
                    return Err(OAuth2Error::InvalidScope(format!(
                        "scope not allowed for this client: {}",
                        disallowed.join(" ")
                    )));
                }
                requested.clone()
            }
            _ => client.allowed_scopes.clone(),
        };

        let now = self.deps.clock.now();
        let family = TokenFamily {
            family_id: Uuid::new_v4(),
            client_id: client.client_id.clone(),
            user_id: client.client_id.clone(),
            code_hash: None,
            created_at: now,
            revoked_at: None,
            revoked_reason: None,
        };
        self.deps.store.create_family(&family).await?;

        let context = TokenContext {
            grant_type: grant_types::CLIENT_CREDENTIALS.to_owned(),
            client_id: client.client_id.clone(),
            user_id: client.client_id.clone(),
            scope: ScopeSet::from_tokens(scope.iter().filter(|s| *s != OPENID)),
            family_id: family.family_id,
        };
        self.issue(
            context,
            Issuance {
                auth_time: now,
                nonce: None,
                rotated_from: None,
                with_refresh: false,
            },
        )
        .await
    }

    async fn issue(
        &self,
        context: TokenContext,
        issuance: Issuance,
    ) -> Result<TokenPair, OAuth2Error> {
        let context = self.deps.hooks.token.run(context)?;
        let now = self.deps.clock.now();
        let access_expires_at = now + self.lifetimes.access_token();

        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: context.user_id.clone(),
            aud: context.client_id.clone(),
            exp: access_expires_at.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            scope: context.scope.to_string(),
            client_id: context.client_id.clone(),
            fid: context.family_id,
            extra: self.custom_claims()?,
        };
        let access_token = self.deps.keys.sign(&claims).await?;

        let (refresh_token, refresh_expires_at) = if issuance.with_refresh {
            let token = generate_opaque_token()?;
            let expires_at = now + self.lifetimes.refresh_token();
            let record = RefreshTokenRecord {
                token_id: Uuid::new_v4(),
                token_hash: hash_opaque_token(&token),
                family_id: context.family_id,
                client_id: context.client_id.clone(),
                user_id: context.user_id.clone(),
                scope: context.scope.clone(),
                auth_time: issuance.auth_time,
                issued_at: now,
                expires_at,
                rotated_from: issuance.rotated_from,
                consumed_at: None,
            };
            self.deps.store.store_refresh_token(&record).await?;
            (Some(token), Some(expires_at))
        } else {
            (None, None)
        };

        let wants_id_token = context.scope.contains(OPENID)
            && context.grant_type != grant_types::CLIENT_CREDENTIALS;
        let id_token = if wants_id_token {
            let id_claims = IdTokenClaims {
                iss: self.issuer.clone(),
                sub: context.user_id.clone(),
                aud: context.client_id.clone(),
                exp: (now + self.lifetimes.id_token()).timestamp(),
                iat: now.timestamp(),
                auth_time: issuance.auth_time.timestamp(),
                nonce: issuance.nonce,
                at_hash: access_token_hash(&access_token),
            };
            Some(self.deps.keys.sign(&id_claims).await?)
        } else {
            None
        };

        Ok(TokenPair {
            access_token,
            refresh_token,
            refresh_token_family: context.family_id,
            user_id: context.user_id,
            client_id: context.client_id,
            scope: context.scope,
            access_expires_at,
            refresh_expires_at,
            rotated_from: issuance.rotated_from,
            id_token,
        })
    }

    fn custom_claims(&self) -> Result<Map<String, Value>, OAuth2Error> {
        let mut extra = self.deps.hooks.access_token_claims.run(Map::new())?;
        extra.retain(|name, _| {
            let reserved = RESERVED_CLAIMS.contains(&name.as_str());
            if reserved {
                warn!(claim = %name, "Ignoring hook claim that overrides a registered claim");
            }
            !reserved
        });
        Ok(extra)
    }
}
