// ABOUTME: OAuth2Store decorator that bounds every backend call with tokio::time::timeout
// ABOUTME: Timeouts surface as StorageError::Timeout; the wrapped operation is never retried here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tollgate_core::errors::StorageError;
use tollgate_core::models::{
    AuthorizationCode, ConsentRecord, ConsumeOutcome, OAuth2Client, PendingAuthorization,
    RefreshTokenRecord, SigningKeyRecord, TokenFamily, UserRecord,
};
use tracing::warn;
use uuid::Uuid;

use super::{OAuth2Store, SharedStore, StorageResult};

/// Store wrapper applying a per-call deadline
pub struct TimeoutStore {
    inner: SharedStore,
    limit: Duration,
}

impl TimeoutStore {
    /// Wrap `inner` with a per-call deadline of `limit`
    #[must_use]
    pub fn new(inner: SharedStore, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StorageResult<T>> + Send,
    ) -> StorageResult<T> {
        if let Ok(result) = timeout(self.limit, call).await {
            result
        } else {
            warn!(
                operation,
                limit_ms = self.limit.as_millis() as u64,
                "store call timed out"
            );
            Err(StorageError::Timeout { operation })
        }
    }
}

#[async_trait]
impl OAuth2Store for TimeoutStore {
    async fn store_client(&self, client: &OAuth2Client) -> StorageResult<()> {
        self.bounded("store_client", self.inner.store_client(client))
            .await
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Option<OAuth2Client>> {
        self.bounded("get_client", self.inner.get_client(client_id))
            .await
    }

    async fn set_client_disabled(&self, client_id: &str, disabled: bool) -> StorageResult<bool> {
        self.bounded(
            "set_client_disabled",
            self.inner.set_client_disabled(client_id, disabled),
        )
        .await
    }

    async fn upsert_user(&self, user: &UserRecord) -> StorageResult<()> {
        self.bounded("upsert_user", self.inner.upsert_user(user))
            .await
    }

    async fn get_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
        self.bounded("get_user", self.inner.get_user(user_id)).await
    }

    async fn store_auth_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        self.bounded("store_auth_code", self.inner.store_auth_code(code))
            .await
    }

    async fn get_auth_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        self.bounded("get_auth_code", self.inner.get_auth_code(code_hash))
            .await
    }

    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<AuthorizationCode>> {
        self.bounded(
            "consume_auth_code",
            self.inner.consume_auth_code(code_hash, now),
        )
        .await
    }

    async fn purge_expired_auth_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.bounded(
            "purge_expired_auth_codes",
            self.inner.purge_expired_auth_codes(now),
        )
        .await
    }

    async fn store_pending_authorization(
        &self,
        pending: &PendingAuthorization,
    ) -> StorageResult<()> {
        self.bounded(
            "store_pending_authorization",
            self.inner.store_pending_authorization(pending),
        )
        .await
    }

    async fn get_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        self.bounded(
            "get_pending_authorization",
            self.inner.get_pending_authorization(consent_id),
        )
        .await
    }

    async fn take_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        self.bounded(
            "take_pending_authorization",
            self.inner.take_pending_authorization(consent_id),
        )
        .await
    }

    async fn purge_expired_pending_authorizations(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.bounded(
            "purge_expired_pending_authorizations",
            self.inner.purge_expired_pending_authorizations(now),
        )
        .await
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> StorageResult<()> {
        self.bounded("upsert_consent", self.inner.upsert_consent(record))
            .await
    }

    async fn get_consent(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> StorageResult<Option<ConsentRecord>> {
        self.bounded("get_consent", self.inner.get_consent(user_id, client_id))
            .await
    }

    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool> {
        self.bounded(
            "delete_consent",
            self.inner.delete_consent(user_id, client_id),
        )
        .await
    }

    async fn list_consents(&self, user_id: &str) -> StorageResult<Vec<ConsentRecord>> {
        self.bounded("list_consents", self.inner.list_consents(user_id))
            .await
    }

    async fn create_family(&self, family: &TokenFamily) -> StorageResult<()> {
        self.bounded("create_family", self.inner.create_family(family))
            .await
    }

    async fn get_family(&self, family_id: Uuid) -> StorageResult<Option<TokenFamily>> {
        self.bounded("get_family", self.inner.get_family(family_id))
            .await
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.bounded(
            "revoke_family",
            self.inner.revoke_family(family_id, reason, now),
        )
        .await
    }

    async fn revoke_families_for_code(
        &self,
        code_hash: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Uuid>> {
        self.bounded(
            "revoke_families_for_code",
            self.inner.revoke_families_for_code(code_hash, reason, now),
        )
        .await
    }

    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> StorageResult<()> {
        self.bounded("store_refresh_token", self.inner.store_refresh_token(record))
            .await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<RefreshTokenRecord>> {
        self.bounded(
            "find_refresh_token",
            self.inner.find_refresh_token(token_hash),
        )
        .await
    }

    async fn get_refresh_token(&self, token_id: Uuid) -> StorageResult<Option<RefreshTokenRecord>> {
        self.bounded("get_refresh_token", self.inner.get_refresh_token(token_id))
            .await
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<RefreshTokenRecord>> {
        self.bounded(
            "consume_refresh_token",
            self.inner.consume_refresh_token(token_hash, now),
        )
        .await
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.bounded(
            "purge_expired_refresh_tokens",
            self.inner.purge_expired_refresh_tokens(now),
        )
        .await
    }

    async fn purge_stale_families(&self, created_before: DateTime<Utc>) -> StorageResult<u64> {
        self.bounded(
            "purge_stale_families",
            self.inner.purge_stale_families(created_before),
        )
        .await
    }

    async fn insert_signing_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        self.bounded("insert_signing_key", self.inner.insert_signing_key(key))
            .await
    }

    async fn list_signing_keys(&self) -> StorageResult<Vec<SigningKeyRecord>> {
        self.bounded("list_signing_keys", self.inner.list_signing_keys())
            .await
    }

    async fn active_signing_kid(&self) -> StorageResult<Option<String>> {
        self.bounded("active_signing_kid", self.inner.active_signing_kid())
            .await
    }

    async fn promote_signing_key(
        &self,
        kid: &str,
        retire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.bounded(
            "promote_signing_key",
            self.inner.promote_signing_key(kid, retire_at, now),
        )
        .await
    }

    async fn expire_signing_keys(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        self.bounded("expire_signing_keys", self.inner.expire_signing_keys(now))
            .await
    }
}
