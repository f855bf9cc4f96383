// ABOUTME: Storage capability interface for the token engine with atomic conditional updates
// ABOUTME: Backends (memory, SQLite) guarantee single-winner consume and single active signing key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! # Storage
//!
//! The token engine never assumes a query language. It relies on the contract of
//! [`OAuth2Store`]:
//!
//! - `consume_*` operations are a single conditional update ("mark consumed if not yet
//!   consumed, return the row"). Exactly one concurrent caller observes
//!   [`ConsumeOutcome::Consumed`]; all others observe [`ConsumeOutcome::AlreadyConsumed`].
//! - `revoke_*` operations only ever set revocation timestamps, never clear them.
//! - `promote_signing_key` moves the previous active key to retiring and the pending key
//!   to active in one atomic step.
//!
//! Correctness holds across processes sharing one backend; no in-process lock is relied on.

/// `DashMap`-backed store for tests and single-node deployments
pub mod memory;

/// SQLite store using `UPDATE ... RETURNING` conditional updates
pub mod sqlite;

/// Decorator bounding every store call with a timeout
pub mod timeout;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::errors::StorageError;
use tollgate_core::models::{
    AuthorizationCode, ConsentRecord, ConsumeOutcome, OAuth2Client, PendingAuthorization,
    RefreshTokenRecord, SigningKeyRecord, TokenFamily, UserRecord,
};
use tracing::info;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use timeout::TimeoutStore;

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage capability used by every component of the token engine
#[async_trait]
pub trait OAuth2Store: Send + Sync {
    // ================================
    // Clients and users
    // ================================

    /// Insert a dynamically registered client
    async fn store_client(&self, client: &OAuth2Client) -> StorageResult<()>;

    /// Look up a dynamically registered client
    async fn get_client(&self, client_id: &str) -> StorageResult<Option<OAuth2Client>>;

    /// Enable or disable a client; returns false if the client does not exist
    async fn set_client_disabled(&self, client_id: &str, disabled: bool) -> StorageResult<bool>;

    /// Insert or replace a user profile
    async fn upsert_user(&self, user: &UserRecord) -> StorageResult<()>;

    /// Look up a user profile
    async fn get_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>>;

    // ================================
    // Authorization codes
    // ================================

    /// Persist a freshly issued code
    async fn store_auth_code(&self, code: &AuthorizationCode) -> StorageResult<()>;

    /// Look up a code by hash without changing it
    async fn get_auth_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>>;

    /// Atomically mark a code consumed.
    ///
    /// When the code was already consumed, `replayed_at` is set (first replay wins) and the
    /// updated row is returned as [`ConsumeOutcome::AlreadyConsumed`].
    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<AuthorizationCode>>;

    /// Delete codes whose expiry has passed
    async fn purge_expired_auth_codes(&self, now: DateTime<Utc>) -> StorageResult<u64>;

    // ================================
    // Pending consent
    // ================================

    /// Persist a request awaiting consent
    async fn store_pending_authorization(
        &self,
        pending: &PendingAuthorization,
    ) -> StorageResult<()>;

    /// Read a pending request without consuming it
    async fn get_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>>;

    /// Atomically remove and return a pending request; at most one caller receives it
    async fn take_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>>;

    /// Delete pending requests whose expiry has passed
    async fn purge_expired_pending_authorizations(&self, now: DateTime<Utc>)
        -> StorageResult<u64>;

    // ================================
    // Consent ledger
    // ================================

    /// Insert or overwrite the consent row for `(user_id, client_id)`
    async fn upsert_consent(&self, record: &ConsentRecord) -> StorageResult<()>;

    /// Latest consent for `(user_id, client_id)`
    async fn get_consent(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> StorageResult<Option<ConsentRecord>>;

    /// Remove a consent row; returns whether one existed
    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool>;

    /// All consents granted by a user
    async fn list_consents(&self, user_id: &str) -> StorageResult<Vec<ConsentRecord>>;

    // ================================
    // Token families and refresh tokens
    // ================================

    /// Create a new refresh-token family
    async fn create_family(&self, family: &TokenFamily) -> StorageResult<()>;

    /// Look up a family
    async fn get_family(&self, family_id: Uuid) -> StorageResult<Option<TokenFamily>>;

    /// Set `revoked_at` if not already set; returns true when this call revoked it
    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Revoke every not-yet-revoked family started by `code_hash`; returns their ids
    async fn revoke_families_for_code(
        &self,
        code_hash: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Uuid>>;

    /// Persist a freshly issued refresh token
    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> StorageResult<()>;

    /// Look up a refresh token by hash without changing it
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<RefreshTokenRecord>>;

    /// Look up a refresh token by id
    async fn get_refresh_token(&self, token_id: Uuid) -> StorageResult<Option<RefreshTokenRecord>>;

    /// Atomically mark a refresh token consumed
    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<RefreshTokenRecord>>;

    /// Delete refresh tokens whose expiry has passed
    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64>;

    /// Delete families created before `created_before` that no longer own a refresh token
    async fn purge_stale_families(&self, created_before: DateTime<Utc>) -> StorageResult<u64>;

    // ================================
    // Signing keys
    // ================================

    /// Persist a new (pending) signing key
    async fn insert_signing_key(&self, key: &SigningKeyRecord) -> StorageResult<()>;

    /// All signing keys, including expired ones
    async fn list_signing_keys(&self) -> StorageResult<Vec<SigningKeyRecord>>;

    /// Kid of the single active key, if any
    async fn active_signing_kid(&self) -> StorageResult<Option<String>>;

    /// Atomically promote `kid` from pending to active and move the current active key to
    /// retiring with `not_after = retire_at`.
    ///
    /// Fails with [`StorageError::NotFound`] for an unknown kid and [`StorageError::Conflict`]
    /// when the key is not pending.
    async fn promote_signing_key(
        &self,
        kid: &str,
        retire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Move retiring keys with `not_after <= now` to expired; returns their kids
    async fn expire_signing_keys(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>>;
}

/// Shared store handle
pub type SharedStore = Arc<dyn OAuth2Store>;

/// Open the store named by `database_url` and wrap it in a [`TimeoutStore`].
///
/// - `memory://` opens a fresh in-memory store
/// - `sqlite:...` opens (and migrates) a SQLite database
///
/// # Errors
///
/// Returns an error for an unsupported URL or if the database cannot be opened
pub async fn connect(database_url: &str, op_timeout: Duration) -> StorageResult<SharedStore> {
    let inner: SharedStore = if database_url.starts_with("memory://") {
        info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else if database_url.starts_with("sqlite:") {
        let store = SqliteStore::connect(database_url).await?;
        store.migrate().await?;
        info!("Using SQLite store");
        Arc::new(store)
    } else {
        return Err(StorageError::backend(
            "connect",
            format!("unsupported database url scheme: {database_url}"),
        ));
    };

    Ok(Arc::new(TimeoutStore::new(inner, op_timeout)))
}
