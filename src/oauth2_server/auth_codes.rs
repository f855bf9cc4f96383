// ABOUTME: Single-use authorization codes stored by SHA-256 hash with a short lifetime
// ABOUTME: Redemption burns the code first, then validates; a second redemption revokes its families
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tollgate_core::errors::{OAuth2Error, StorageError};
use tollgate_core::models::{AuthorizationCode, ConsumeOutcome, OAuth2Client, PkceMethod, ScopeSet};
use tracing::{debug, warn};

use super::revocation::{reasons, RevocationRegistry};
use crate::clock::SharedClock;
use crate::crypto::pkce;
use crate::crypto::{generate_opaque_token, hash_opaque_token};
use crate::notifications::{SecurityEvent, SharedEventSink};
use crate::storage::SharedStore;

/// Everything bound to a code at issuance
#[derive(Debug, Clone)]
pub struct CodeGrant {
    /// Client the code is issued to
    pub client_id: String,
    /// End user who approved
    pub user_id: String,
    /// Redirect URI the code is delivered to
    pub redirect_uri: String,
    /// Granted scope
    pub scope: ScopeSet,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// PKCE method
    pub code_challenge_method: Option<PkceMethod>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// When the end user authenticated
    pub auth_time: DateTime<Utc>,
}

/// Authorization code store
pub struct AuthorizationCodeStore {
    store: SharedStore,
    clock: SharedClock,
    revocation: Arc<RevocationRegistry>,
    events: SharedEventSink,
    ttl: Duration,
}

impl AuthorizationCodeStore {
    /// Create a code store issuing codes valid for `ttl`
    #[must_use]
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        revocation: Arc<RevocationRegistry>,
        events: SharedEventSink,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            revocation,
            events,
            ttl,
        }
    }

    /// Issue a code. Only its hash is stored; the raw value goes to the client once.
    ///
    /// # Errors
    ///
    /// Returns an error if random generation or storage fails
    pub async fn issue(&self, grant: CodeGrant) -> Result<String, OAuth2Error> {
        let code = generate_opaque_token()?;
        let now = self.clock.now();
        let record = AuthorizationCode {
            code_hash: hash_opaque_token(&code),
            client_id: grant.client_id,
            user_id: grant.user_id,
            redirect_uri: grant.redirect_uri,
            scope: grant.scope,
            code_challenge: grant.code_challenge,
            code_challenge_method: grant.code_challenge_method,
            nonce: grant.nonce,
            auth_time: grant.auth_time,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed_at: None,
            replayed_at: None,
        };
        self.store.store_auth_code(&record).await?;
        debug!(client_id = %record.client_id, user_id = %record.user_id, "Issued authorization code");
        Ok(code)
    }

    /// Redeem a code exactly once.
    ///
    /// The code is consumed before any check, so a failed redemption still burns it. A code
    /// that was already consumed is a replay: every family it started is revoked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for unknown, replayed, expired, or mismatched codes and for a
    /// failed PKCE check
    pub async fn redeem(
        &self,
        code: &str,
        client: &OAuth2Client,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<AuthorizationCode, OAuth2Error> {
        let code_hash = hash_opaque_token(code);
        let now = self.clock.now();

        let record = match self.store.consume_auth_code(&code_hash, now).await? {
            ConsumeOutcome::Consumed(record) => record,
            ConsumeOutcome::NotFound => return Err(invalid_grant("Unknown authorization code")),
            ConsumeOutcome::AlreadyConsumed(record) => {
                self.handle_replay(&record).await?;
                return Err(invalid_grant("Authorization code already used"));
            }
        };

        if record.is_expired(now) {
            return Err(invalid_grant("Authorization code expired"));
        }
        if record.client_id != client.client_id {
            warn!(
                code_client = %record.client_id,
                presenting_client = %client.client_id,
                "Authorization code presented by another client"
            );
            return Err(invalid_grant("Authorization code was issued to another client"));
        }
        let redirect_matches = match redirect_uri {
            Some(uri) => uri == record.redirect_uri,
            None => client.redirect_uris.len() == 1,
        };
        if !redirect_matches {
            return Err(invalid_grant("redirect_uri does not match the authorization request"));
        }
        Self::check_pkce(&record, client, code_verifier)?;

        Ok(record)
    }

    fn check_pkce(
        record: &AuthorizationCode,
        client: &OAuth2Client,
        code_verifier: Option<&str>,
    ) -> Result<(), OAuth2Error> {
        match (&record.code_challenge, code_verifier) {
            (None, None) if !client.is_public() => Ok(()),
            (None, _) => Err(invalid_grant("code_verifier was not expected")),
            (Some(_), None) => Err(invalid_grant("code_verifier is required")),
            (Some(challenge), Some(verifier)) => {
                let method = record.code_challenge_method.unwrap_or(PkceMethod::Plain);
                if method == PkceMethod::Plain && client.is_public() {
                    return Err(invalid_grant("plain PKCE is not allowed for public clients"));
                }
                if pkce::verify(verifier, challenge, method) {
                    Ok(())
                } else {
                    Err(invalid_grant("PKCE verification failed"))
                }
            }
        }
    }

    async fn handle_replay(&self, record: &AuthorizationCode) -> Result<(), OAuth2Error> {
        let revoked = self
            .revocation
            .revoke_families_for_code(&record.code_hash, reasons::CODE_REPLAY)
            .await?;
        warn!(
            client_id = %record.client_id,
            user_id = %record.user_id,
            revoked_families = revoked.len(),
            "Authorization code replay detected"
        );
        self.events
            .emit(SecurityEvent::AuthorizationCodeReplay {
                client_id: record.client_id.clone(),
                user_id: record.user_id.clone(),
                revoked_families: revoked,
            })
            .await;
        Ok(())
    }

    /// Whether a code was presented again after its first redemption
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails
    pub async fn was_replayed(&self, code_hash: &str) -> Result<bool, OAuth2Error> {
        Ok(self
            .store
            .get_auth_code(code_hash)
            .await?
            .is_some_and(|code| code.replayed_at.is_some()))
    }

    /// Delete expired codes
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.store.purge_expired_auth_codes(self.clock.now()).await
    }
}

fn invalid_grant(description: &str) -> OAuth2Error {
    OAuth2Error::InvalidGrant(description.to_owned())
}
