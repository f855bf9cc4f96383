// ABOUTME: In-memory OAuth2Store backed by DashMap for tests and single-node deployments
// ABOUTME: Conditional updates run under the per-key shard lock so exactly one consumer wins
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tollgate_core::errors::StorageError;
use tollgate_core::models::{
    AuthorizationCode, ConsentRecord, ConsumeOutcome, KeyState, OAuth2Client,
    PendingAuthorization, RefreshTokenRecord, SigningKeyRecord, TokenFamily, UserRecord,
};
use uuid::Uuid;

use super::{OAuth2Store, StorageResult};

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    clients: DashMap<String, OAuth2Client>,
    users: DashMap<String, UserRecord>,
    auth_codes: DashMap<String, AuthorizationCode>,
    pending: DashMap<String, PendingAuthorization>,
    consents: DashMap<(String, String), ConsentRecord>,
    families: DashMap<Uuid, TokenFamily>,
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
    refresh_ids: DashMap<Uuid, String>,
    // Promotion touches two rows, so keys sit behind one lock that is never held across await
    signing_keys: Mutex<BTreeMap<String, SigningKeyRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, BTreeMap<String, SigningKeyRecord>> {
        self.signing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OAuth2Store for MemoryStore {
    async fn store_client(&self, client: &OAuth2Client) -> StorageResult<()> {
        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(format!(
                "client {} already exists",
                client.client_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(client.clone());
                Ok(())
            }
        }
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Option<OAuth2Client>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn set_client_disabled(&self, client_id: &str, disabled: bool) -> StorageResult<bool> {
        Ok(self
            .clients
            .get_mut(client_id)
            .map(|mut client| client.disabled = disabled)
            .is_some())
    }

    async fn upsert_user(&self, user: &UserRecord) -> StorageResult<()> {
        self.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn store_auth_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        self.auth_codes.insert(code.code_hash.clone(), code.clone());
        Ok(())
    }

    async fn get_auth_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        Ok(self.auth_codes.get(code_hash).map(|c| c.clone()))
    }

    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<AuthorizationCode>> {
        let Some(mut entry) = self.auth_codes.get_mut(code_hash) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if entry.consumed_at.is_none() {
            entry.consumed_at = Some(now);
            Ok(ConsumeOutcome::Consumed(entry.clone()))
        } else {
            entry.replayed_at.get_or_insert(now);
            Ok(ConsumeOutcome::AlreadyConsumed(entry.clone()))
        }
    }

    async fn purge_expired_auth_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let before = self.auth_codes.len();
        self.auth_codes.retain(|_, code| !code.is_expired(now));
        Ok((before - self.auth_codes.len()) as u64)
    }

    async fn store_pending_authorization(
        &self,
        pending: &PendingAuthorization,
    ) -> StorageResult<()> {
        self.pending
            .insert(pending.consent_id.clone(), pending.clone());
        Ok(())
    }

    async fn get_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        Ok(self.pending.get(consent_id).map(|p| p.clone()))
    }

    async fn take_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        Ok(self.pending.remove(consent_id).map(|(_, p)| p))
    }

    async fn purge_expired_pending_authorizations(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let before = self.pending.len();
        self.pending.retain(|_, p| !p.is_expired(now));
        Ok((before - self.pending.len()) as u64)
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> StorageResult<()> {
        self.consents.insert(
            (record.user_id.clone(), record.client_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn get_consent(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> StorageResult<Option<ConsentRecord>> {
        Ok(self
            .consents
            .get(&(user_id.to_owned(), client_id.to_owned()))
            .map(|c| c.clone()))
    }

    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool> {
        Ok(self
            .consents
            .remove(&(user_id.to_owned(), client_id.to_owned()))
            .is_some())
    }

    async fn list_consents(&self, user_id: &str) -> StorageResult<Vec<ConsentRecord>> {
        let mut consents: Vec<ConsentRecord> = self
            .consents
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        consents.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(consents)
    }

    async fn create_family(&self, family: &TokenFamily) -> StorageResult<()> {
        self.families.insert(family.family_id, family.clone());
        Ok(())
    }

    async fn get_family(&self, family_id: Uuid) -> StorageResult<Option<TokenFamily>> {
        Ok(self.families.get(&family_id).map(|f| f.clone()))
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let Some(mut family) = self.families.get_mut(&family_id) else {
            return Ok(false);
        };
        if family.revoked_at.is_some() {
            return Ok(false);
        }
        family.revoked_at = Some(now);
        family.revoked_reason = Some(reason.to_owned());
        Ok(true)
    }

    async fn revoke_families_for_code(
        &self,
        code_hash: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Uuid>> {
        let mut revoked = Vec::new();
        for mut family in self.families.iter_mut() {
            if family.code_hash.as_deref() == Some(code_hash) && family.revoked_at.is_none() {
                family.revoked_at = Some(now);
                family.revoked_reason = Some(reason.to_owned());
                revoked.push(family.family_id);
            }
        }
        Ok(revoked)
    }

    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> StorageResult<()> {
        match self.refresh_tokens.entry(record.token_hash.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(
                "refresh token hash collision".to_owned(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.refresh_ids
                    .insert(record.token_id, record.token_hash.clone());
                Ok(())
            }
        }
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<RefreshTokenRecord>> {
        Ok(self.refresh_tokens.get(token_hash).map(|r| r.clone()))
    }

    async fn get_refresh_token(&self, token_id: Uuid) -> StorageResult<Option<RefreshTokenRecord>> {
        let Some(hash) = self.refresh_ids.get(&token_id).map(|h| h.clone()) else {
            return Ok(None);
        };
        Ok(self.refresh_tokens.get(&hash).map(|r| r.clone()))
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<RefreshTokenRecord>> {
        let Some(mut entry) = self.refresh_tokens.get_mut(token_hash) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if entry.consumed_at.is_none() {
            entry.consumed_at = Some(now);
            Ok(ConsumeOutcome::Consumed(entry.clone()))
        } else {
            Ok(ConsumeOutcome::AlreadyConsumed(entry.clone()))
        }
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let expired: Vec<(String, Uuid)> = self
            .refresh_tokens
            .iter()
            .filter(|r| r.is_expired(now))
            .map(|r| (r.token_hash.clone(), r.token_id))
            .collect();
        for (hash, id) in &expired {
            self.refresh_tokens.remove(hash);
            self.refresh_ids.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn purge_stale_families(&self, created_before: DateTime<Utc>) -> StorageResult<u64> {
        let owners: HashSet<Uuid> = self.refresh_tokens.iter().map(|r| r.family_id).collect();
        let stale: Vec<Uuid> = self
            .families
            .iter()
            .filter(|f| f.created_at < created_before && !owners.contains(&f.family_id))
            .map(|f| f.family_id)
            .collect();
        for family_id in &stale {
            self.families.remove(family_id);
        }
        Ok(stale.len() as u64)
    }

    async fn insert_signing_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        let mut keys = self.keys();
        if keys.contains_key(&key.kid) {
            return Err(StorageError::Conflict(format!("kid {} already exists", key.kid)));
        }
        keys.insert(key.kid.clone(), key.clone());
        drop(keys);
        Ok(())
    }

    async fn list_signing_keys(&self) -> StorageResult<Vec<SigningKeyRecord>> {
        let mut keys: Vec<SigningKeyRecord> = self.keys().values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    async fn active_signing_kid(&self) -> StorageResult<Option<String>> {
        Ok(self
            .keys()
            .values()
            .find(|k| k.state == KeyState::Active)
            .map(|k| k.kid.clone()))
    }

    async fn promote_signing_key(
        &self,
        kid: &str,
        retire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut keys = self.keys();
        match keys.get(kid).map(|k| k.state) {
            None => return Err(StorageError::NotFound(format!("signing key {kid}"))),
            Some(KeyState::Pending) => {}
            Some(state) => {
                return Err(StorageError::Conflict(format!(
                    "signing key {kid} is {state}, only pending keys can be promoted"
                )))
            }
        }

        for key in keys.values_mut().filter(|k| k.state == KeyState::Active) {
            key.state = KeyState::Retiring;
            key.not_after = Some(retire_at);
        }
        if let Some(key) = keys.get_mut(kid) {
            key.state = KeyState::Active;
            key.not_before = key.not_before.min(now);
        }
        drop(keys);
        Ok(())
    }

    async fn expire_signing_keys(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut keys = self.keys();
        let mut expired = Vec::new();
        for key in keys.values_mut() {
            if key.state == KeyState::Retiring && key.not_after.is_some_and(|end| end <= now) {
                key.state = KeyState::Expired;
                expired.push(key.kid.clone());
            }
        }
        drop(keys);
        Ok(expired)
    }
}
