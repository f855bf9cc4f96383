// ABOUTME: Consent ledger recording which scopes each user granted each client
// ABOUTME: Also holds validated authorization requests while the user decides (single-use pending rows)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Duration, Utc};
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::{
    ConsentDecision, ConsentRecord, OAuth2Client, PendingAuthorization, ScopeSet,
};
use tracing::{debug, info};

use super::validator::ValidatedAuthorization;
use crate::clock::SharedClock;
use crate::crypto::random::generate_random_string;
use crate::notifications::{SecurityEvent, SharedEventSink};
use crate::storage::SharedStore;

/// Bytes of entropy in consent ids
const CONSENT_ID_BYTES: usize = 24;

/// Consent ledger
pub struct ConsentLedger {
    store: SharedStore,
    clock: SharedClock,
    events: SharedEventSink,
    consent_ttl: Option<Duration>,
    pending_ttl: Duration,
}

impl ConsentLedger {
    /// Create a ledger. `consent_ttl = None` keeps consent until revoked.
    #[must_use]
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        events: SharedEventSink,
        consent_ttl: Option<Duration>,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            consent_ttl,
            pending_ttl,
        }
    }

    /// Decide whether the consent screen is needed.
    ///
    /// Trusted clients skip consent. Otherwise consent is skipped only when the requested scope
    /// is a subset of a stored, unexpired grant. Repeated calls agree until consent is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails
    pub async fn check_consent(
        &self,
        user_id: &str,
        client: &OAuth2Client,
        scope: &ScopeSet,
    ) -> Result<ConsentDecision, OAuth2Error> {
        if client.trusted {
            return Ok(ConsentDecision::Skip);
        }
        let Some(record) = self.store.get_consent(user_id, &client.client_id).await? else {
            return Ok(ConsentDecision::Show);
        };
        if self.is_expired(&record, self.clock.now()) {
            debug!(user_id, client_id = %client.client_id, "Stored consent expired");
            return Ok(ConsentDecision::Expired);
        }
        if scope.is_subset_of(&record.scope) {
            Ok(ConsentDecision::Skip)
        } else {
            Ok(ConsentDecision::Show)
        }
    }

    fn is_expired(&self, record: &ConsentRecord, now: DateTime<Utc>) -> bool {
        self.consent_ttl
            .is_some_and(|ttl| now >= record.granted_at + ttl)
    }

    /// Record the user's decision. Approval overwrites the stored scope; rejection stores nothing.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` when the user declined, or a server error if the store fails
    pub async fn record_consent(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
        accepted: bool,
    ) -> Result<(), OAuth2Error> {
        if !accepted {
            info!(user_id, client_id, "User denied consent");
            return Err(OAuth2Error::AccessDenied(
                "The user denied the request".to_owned(),
            ));
        }
        let record = ConsentRecord {
            user_id: user_id.to_owned(),
            client_id: client_id.to_owned(),
            scope: scope.clone(),
            granted_at: self.clock.now(),
        };
        self.store.upsert_consent(&record).await?;
        self.events
            .emit(SecurityEvent::ConsentGranted {
                user_id: user_id.to_owned(),
                client_id: client_id.to_owned(),
                scope: scope.to_string(),
            })
            .await;
        Ok(())
    }

    /// Withdraw consent; returns whether a grant existed
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails
    pub async fn revoke_consent(&self, user_id: &str, client_id: &str) -> Result<bool, OAuth2Error> {
        let existed = self.store.delete_consent(user_id, client_id).await?;
        if existed {
            self.events
                .emit(SecurityEvent::ConsentRevoked {
                    user_id: user_id.to_owned(),
                    client_id: client_id.to_owned(),
                })
                .await;
        }
        Ok(existed)
    }

    /// Every grant a user has made
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails
    pub async fn list_consents(&self, user_id: &str) -> Result<Vec<ConsentRecord>, OAuth2Error> {
        Ok(self.store.list_consents(user_id).await?)
    }

    /// Park a validated request until the user decides
    ///
    /// # Errors
    ///
    /// Returns an error if id generation or storage fails
    pub async fn create_pending(
        &self,
        request: &ValidatedAuthorization,
        user_id: &str,
        auth_time: DateTime<Utc>,
    ) -> Result<PendingAuthorization, OAuth2Error> {
        let now = self.clock.now();
        let pending = PendingAuthorization {
            consent_id: generate_random_string(CONSENT_ID_BYTES)?,
            user_id: user_id.to_owned(),
            client_id: request.client.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope: request.scope.clone(),
            state: request.state.clone(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method,
            nonce: request.nonce.clone(),
            auth_time,
            created_at: now,
            expires_at: now + self.pending_ttl,
        };
        self.store.store_pending_authorization(&pending).await?;
        Ok(pending)
    }

    /// Read a pending request owned by `user_id` without consuming it
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the id is unknown, expired, or owned by another user
    pub async fn pending(
        &self,
        consent_id: &str,
        user_id: &str,
    ) -> Result<PendingAuthorization, OAuth2Error> {
        let pending = self.store.get_pending_authorization(consent_id).await?;
        self.check_pending(pending, user_id)
    }

    /// Atomically claim a pending request; at most one submission succeeds
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the id is unknown, already used, expired, or owned by
    /// another user
    pub async fn take_pending(
        &self,
        consent_id: &str,
        user_id: &str,
    ) -> Result<PendingAuthorization, OAuth2Error> {
        if let Some(peek) = self.store.get_pending_authorization(consent_id).await? {
            if peek.user_id != user_id {
                return Err(unknown_consent());
            }
        }
        let pending = self.store.take_pending_authorization(consent_id).await?;
        self.check_pending(pending, user_id)
    }

    fn check_pending(
        &self,
        pending: Option<PendingAuthorization>,
        user_id: &str,
    ) -> Result<PendingAuthorization, OAuth2Error> {
        match pending {
            Some(p) if p.user_id == user_id && !p.is_expired(self.clock.now()) => Ok(p),
            _ => Err(unknown_consent()),
        }
    }
}

fn unknown_consent() -> OAuth2Error {
    OAuth2Error::InvalidRequest("Unknown or expired consent request".to_owned())
}
