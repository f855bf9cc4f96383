// ABOUTME: Permanent revocation of refresh-token families and the lookups that enforce it
// ABOUTME: A revoked family invalidates every refresh token and access token (via fid) it produced
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use tollgate_core::errors::StorageError;
use tracing::info;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::notifications::{SecurityEvent, SharedEventSink};
use crate::storage::SharedStore;

/// Revocation reasons recorded on families
pub mod reasons {
    /// A rotated refresh token was presented again
    pub const REFRESH_TOKEN_REUSE: &str = "refresh_token_reuse";
    /// A consumed authorization code was presented again
    pub const CODE_REPLAY: &str = "authorization_code_replay";
    /// The client revoked a token (RFC 7009)
    pub const CLIENT_REQUEST: &str = "client_request";
    /// An operator revoked the family
    pub const ADMIN: &str = "admin";
}

/// Registry of revoked token families. There is no un-revoke.
pub struct RevocationRegistry {
    store: SharedStore,
    clock: SharedClock,
    events: SharedEventSink,
}

impl RevocationRegistry {
    /// Create a registry
    #[must_use]
    pub fn new(store: SharedStore, clock: SharedClock, events: SharedEventSink) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    /// Revoke a family. Idempotent: returns false when it was already revoked or unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails
    pub async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<bool, StorageError> {
        let revoked = self
            .store
            .revoke_family(family_id, reason, self.clock.now())
            .await?;
        if revoked {
            info!(family_id = %family_id, reason, "Token family revoked");
            self.events
                .emit(SecurityEvent::FamilyRevoked {
                    family_id,
                    reason: reason.to_owned(),
                })
                .await;
        }
        Ok(revoked)
    }

    /// Revoke every family started by an authorization code
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails
    pub async fn revoke_families_for_code(
        &self,
        code_hash: &str,
        reason: &str,
    ) -> Result<Vec<Uuid>, StorageError> {
        let revoked = self
            .store
            .revoke_families_for_code(code_hash, reason, self.clock.now())
            .await?;
        for family_id in &revoked {
            info!(family_id = %family_id, reason, "Token family revoked");
            self.events
                .emit(SecurityEvent::FamilyRevoked {
                    family_id: *family_id,
                    reason: reason.to_owned(),
                })
                .await;
        }
        Ok(revoked)
    }

    /// Whether a refresh token may no longer be used: unknown tokens count as revoked
    ///
    /// # Errors
    ///
    /// Returns an error if a store lookup fails
    pub async fn is_revoked(&self, token_id: Uuid) -> Result<bool, StorageError> {
        let Some(token) = self.store.get_refresh_token(token_id).await? else {
            return Ok(true);
        };
        self.is_family_revoked(token.family_id).await
    }

    /// Whether a family is revoked; unknown families count as revoked
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails
    pub async fn is_family_revoked(&self, family_id: Uuid) -> Result<bool, StorageError> {
        Ok(self
            .store
            .get_family(family_id)
            .await?
            .is_none_or(|family| family.is_revoked()))
    }
}
