// ABOUTME: SQLite OAuth2Store implementation using sqlx with conditional UPDATE ... RETURNING
// ABOUTME: Single-use consumption and key promotion are enforced by the database, not by locks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tollgate_core::errors::StorageError;
use tollgate_core::models::{
    AuthorizationCode, ClientType, ConsentRecord, ConsumeOutcome, KeyState, OAuth2Client,
    PendingAuthorization, PkceMethod, RefreshTokenRecord, ScopeSet, SigningKeyRecord, TokenFamily,
    UserRecord,
};
use tracing::debug;
use uuid::Uuid;

use super::{OAuth2Store, StorageResult};

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open a SQLite database.
    ///
    /// In-memory URLs get a single long-lived connection so every query sees the same
    /// database; file URLs are created if missing and opened in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the database cannot be opened
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables and indexes
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails
    pub async fn migrate(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema is up to date");
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS oauth2_clients (
        client_id TEXT PRIMARY KEY,
        client_secret_hash TEXT,
        redirect_uris TEXT NOT NULL,
        allowed_scopes TEXT NOT NULL,
        client_type TEXT NOT NULL CHECK (client_type IN ('confidential', 'public')),
        trusted INTEGER NOT NULL DEFAULT 0,
        disabled INTEGER NOT NULL DEFAULT 0,
        client_name TEXT,
        grant_types TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS users (
        user_id TEXT PRIMARY KEY,
        email TEXT,
        email_verified INTEGER NOT NULL DEFAULT 0,
        name TEXT,
        given_name TEXT,
        family_name TEXT,
        picture TEXT,
        updated_at INTEGER
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_auth_codes (
        code_hash TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL,
        code_challenge TEXT,
        code_challenge_method TEXT,
        nonce TEXT,
        auth_time INTEGER NOT NULL,
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        consumed_at INTEGER,
        replayed_at INTEGER
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_auth_codes_expires ON oauth2_auth_codes(expires_at)",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_pending_authorizations (
        consent_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL,
        state TEXT,
        code_challenge TEXT,
        code_challenge_method TEXT,
        nonce TEXT,
        auth_time INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_consents (
        user_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        granted_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, client_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_token_families (
        family_id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        code_hash TEXT,
        created_at INTEGER NOT NULL,
        revoked_at INTEGER,
        revoked_reason TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_token_families_code ON oauth2_token_families(code_hash)",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_refresh_tokens (
        token_id TEXT PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        family_id TEXT NOT NULL REFERENCES oauth2_token_families(family_id),
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        auth_time INTEGER NOT NULL,
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        rotated_from TEXT,
        consumed_at INTEGER
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_family ON oauth2_refresh_tokens(family_id)",
    r"
    CREATE TABLE IF NOT EXISTS signing_keys (
        kid TEXT PRIMARY KEY,
        algorithm TEXT NOT NULL,
        state TEXT NOT NULL CHECK (state IN ('pending', 'active', 'retiring', 'expired')),
        private_key_pem TEXT NOT NULL,
        not_before INTEGER NOT NULL,
        not_after INTEGER,
        created_at INTEGER NOT NULL
    )
    ",
    // At most one active key, enforced by the database
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_signing_keys_single_active ON signing_keys(state) WHERE state = 'active'",
];

// ================================
// Row conversion helpers
// ================================

fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(table: &'static str, millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::corrupt(table, format!("timestamp {millis} out of range")))
}

fn opt_from_millis(table: &'static str, millis: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
    millis.map(|m| from_millis(table, m)).transpose()
}

fn parse_uuid(table: &'static str, raw: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::corrupt(table, e.to_string()))
}

fn parse_method(table: &'static str, raw: Option<String>) -> StorageResult<Option<PkceMethod>> {
    raw.map(|m| {
        PkceMethod::parse(&m)
            .ok_or_else(|| StorageError::corrupt(table, format!("unknown pkce method {m}")))
    })
    .transpose()
}

fn decode_json_list(table: &'static str, raw: &str) -> StorageResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| StorageError::corrupt(table, e.to_string()))
}

fn encode_json_list(list: &[String]) -> StorageResult<String> {
    serde_json::to_string(list).map_err(|e| StorageError::backend("encode list", e.to_string()))
}

fn row_to_client(row: &SqliteRow) -> StorageResult<OAuth2Client> {
    const TABLE: &str = "oauth2_clients";
    let client_type: String = row.try_get("client_type")?;
    Ok(OAuth2Client {
        client_id: row.try_get("client_id")?,
        client_secret_hash: row.try_get("client_secret_hash")?,
        redirect_uris: decode_json_list(TABLE, &row.try_get::<String, _>("redirect_uris")?)?,
        allowed_scopes: ScopeSet::parse(&row.try_get::<String, _>("allowed_scopes")?),
        client_type: ClientType::parse(&client_type)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("client_type {client_type}")))?,
        trusted: row.try_get("trusted")?,
        disabled: row.try_get("disabled")?,
        client_name: row.try_get("client_name")?,
        grant_types: decode_json_list(TABLE, &row.try_get::<String, _>("grant_types")?)?,
        created_at: from_millis(TABLE, row.try_get("created_at")?)?,
    })
}

fn row_to_user(row: &SqliteRow) -> StorageResult<UserRecord> {
    Ok(UserRecord {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        email_verified: row.try_get("email_verified")?,
        name: row.try_get("name")?,
        given_name: row.try_get("given_name")?,
        family_name: row.try_get("family_name")?,
        picture: row.try_get("picture")?,
        updated_at: opt_from_millis("users", row.try_get("updated_at")?)?,
    })
}

fn row_to_auth_code(row: &SqliteRow) -> StorageResult<AuthorizationCode> {
    const TABLE: &str = "oauth2_auth_codes";
    Ok(AuthorizationCode {
        code_hash: row.try_get("code_hash")?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        redirect_uri: row.try_get("redirect_uri")?,
        scope: ScopeSet::parse(&row.try_get::<String, _>("scope")?),
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method: parse_method(TABLE, row.try_get("code_challenge_method")?)?,
        nonce: row.try_get("nonce")?,
        auth_time: from_millis(TABLE, row.try_get("auth_time")?)?,
        issued_at: from_millis(TABLE, row.try_get("issued_at")?)?,
        expires_at: from_millis(TABLE, row.try_get("expires_at")?)?,
        consumed_at: opt_from_millis(TABLE, row.try_get("consumed_at")?)?,
        replayed_at: opt_from_millis(TABLE, row.try_get("replayed_at")?)?,
    })
}

fn row_to_pending(row: &SqliteRow) -> StorageResult<PendingAuthorization> {
    const TABLE: &str = "oauth2_pending_authorizations";
    Ok(PendingAuthorization {
        consent_id: row.try_get("consent_id")?,
        user_id: row.try_get("user_id")?,
        client_id: row.try_get("client_id")?,
        redirect_uri: row.try_get("redirect_uri")?,
        scope: ScopeSet::parse(&row.try_get::<String, _>("scope")?),
        state: row.try_get("state")?,
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method: parse_method(TABLE, row.try_get("code_challenge_method")?)?,
        nonce: row.try_get("nonce")?,
        auth_time: from_millis(TABLE, row.try_get("auth_time")?)?,
        created_at: from_millis(TABLE, row.try_get("created_at")?)?,
        expires_at: from_millis(TABLE, row.try_get("expires_at")?)?,
    })
}

fn row_to_consent(row: &SqliteRow) -> StorageResult<ConsentRecord> {
    Ok(ConsentRecord {
        user_id: row.try_get("user_id")?,
        client_id: row.try_get("client_id")?,
        scope: ScopeSet::parse(&row.try_get::<String, _>("scope")?),
        granted_at: from_millis("oauth2_consents", row.try_get("granted_at")?)?,
    })
}

fn row_to_family(row: &SqliteRow) -> StorageResult<TokenFamily> {
    const TABLE: &str = "oauth2_token_families";
    Ok(TokenFamily {
        family_id: parse_uuid(TABLE, &row.try_get::<String, _>("family_id")?)?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        code_hash: row.try_get("code_hash")?,
        created_at: from_millis(TABLE, row.try_get("created_at")?)?,
        revoked_at: opt_from_millis(TABLE, row.try_get("revoked_at")?)?,
        revoked_reason: row.try_get("revoked_reason")?,
    })
}

fn row_to_refresh_token(row: &SqliteRow) -> StorageResult<RefreshTokenRecord> {
    const TABLE: &str = "oauth2_refresh_tokens";
    let rotated_from: Option<String> = row.try_get("rotated_from")?;
    Ok(RefreshTokenRecord {
        token_id: parse_uuid(TABLE, &row.try_get::<String, _>("token_id")?)?,
        token_hash: row.try_get("token_hash")?,
        family_id: parse_uuid(TABLE, &row.try_get::<String, _>("family_id")?)?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        scope: ScopeSet::parse(&row.try_get::<String, _>("scope")?),
        auth_time: from_millis(TABLE, row.try_get("auth_time")?)?,
        issued_at: from_millis(TABLE, row.try_get("issued_at")?)?,
        expires_at: from_millis(TABLE, row.try_get("expires_at")?)?,
        rotated_from: rotated_from
            .as_deref()
            .map(|raw| parse_uuid(TABLE, raw))
            .transpose()?,
        consumed_at: opt_from_millis(TABLE, row.try_get("consumed_at")?)?,
    })
}

fn row_to_signing_key(row: &SqliteRow) -> StorageResult<SigningKeyRecord> {
    const TABLE: &str = "signing_keys";
    let state: String = row.try_get("state")?;
    Ok(SigningKeyRecord {
        kid: row.try_get("kid")?,
        algorithm: row.try_get("algorithm")?,
        state: KeyState::parse(&state)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("key state {state}")))?,
        private_key_pem: row.try_get("private_key_pem")?,
        not_before: from_millis(TABLE, row.try_get("not_before")?)?,
        not_after: opt_from_millis(TABLE, row.try_get("not_after")?)?,
        created_at: from_millis(TABLE, row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl OAuth2Store for SqliteStore {
    async fn store_client(&self, client: &OAuth2Client) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_clients
                (client_id, client_secret_hash, redirect_uris, allowed_scopes, client_type,
                 trusted, disabled, client_name, grant_types, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&client.client_id)
        .bind(&client.client_secret_hash)
        .bind(encode_json_list(&client.redirect_uris)?)
        .bind(client.allowed_scopes.to_string())
        .bind(client.client_type.as_str())
        .bind(client.trusted)
        .bind(client.disabled)
        .bind(&client.client_name)
        .bind(encode_json_list(&client.grant_types)?)
        .bind(to_millis(client.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Option<OAuth2Client>> {
        sqlx::query("SELECT * FROM oauth2_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_client)
            .transpose()
    }

    async fn set_client_disabled(&self, client_id: &str, disabled: bool) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE oauth2_clients SET disabled = $1 WHERE client_id = $2")
            .bind(disabled)
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_user(&self, user: &UserRecord) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO users
                (user_id, email, email_verified, name, given_name, family_name, picture, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                email_verified = excluded.email_verified,
                name = excluded.name,
                given_name = excluded.given_name,
                family_name = excluded.family_name,
                picture = excluded.picture,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.name)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(&user.picture)
        .bind(user.updated_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
        sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_user)
            .transpose()
    }

    async fn store_auth_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_auth_codes
                (code_hash, client_id, user_id, redirect_uri, scope, code_challenge,
                 code_challenge_method, nonce, auth_time, issued_at, expires_at,
                 consumed_at, replayed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(&code.code_hash)
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(&code.redirect_uri)
        .bind(code.scope.to_string())
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.map(|m| m.as_str()))
        .bind(&code.nonce)
        .bind(to_millis(code.auth_time))
        .bind(to_millis(code.issued_at))
        .bind(to_millis(code.expires_at))
        .bind(code.consumed_at.map(to_millis))
        .bind(code.replayed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_auth_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        sqlx::query("SELECT * FROM oauth2_auth_codes WHERE code_hash = $1")
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_auth_code)
            .transpose()
    }

    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<AuthorizationCode>> {
        let consumed = sqlx::query(
            r"
            UPDATE oauth2_auth_codes
            SET consumed_at = $1
            WHERE code_hash = $2 AND consumed_at IS NULL
            RETURNING *
            ",
        )
        .bind(to_millis(now))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = consumed {
            return Ok(ConsumeOutcome::Consumed(row_to_auth_code(&row)?));
        }

        // Lost the race or replayed: record the replay and hand back the row
        let replayed = sqlx::query(
            r"
            UPDATE oauth2_auth_codes
            SET replayed_at = COALESCE(replayed_at, $1)
            WHERE code_hash = $2
            RETURNING *
            ",
        )
        .bind(to_millis(now))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        match replayed {
            Some(row) => Ok(ConsumeOutcome::AlreadyConsumed(row_to_auth_code(&row)?)),
            None => Ok(ConsumeOutcome::NotFound),
        }
    }

    async fn purge_expired_auth_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM oauth2_auth_codes WHERE expires_at <= $1")
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn store_pending_authorization(
        &self,
        pending: &PendingAuthorization,
    ) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_pending_authorizations
                (consent_id, user_id, client_id, redirect_uri, scope, state, code_challenge,
                 code_challenge_method, nonce, auth_time, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(&pending.consent_id)
        .bind(&pending.user_id)
        .bind(&pending.client_id)
        .bind(&pending.redirect_uri)
        .bind(pending.scope.to_string())
        .bind(&pending.state)
        .bind(&pending.code_challenge)
        .bind(pending.code_challenge_method.map(|m| m.as_str()))
        .bind(&pending.nonce)
        .bind(to_millis(pending.auth_time))
        .bind(to_millis(pending.created_at))
        .bind(to_millis(pending.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        sqlx::query("SELECT * FROM oauth2_pending_authorizations WHERE consent_id = $1")
            .bind(consent_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_pending)
            .transpose()
    }

    async fn take_pending_authorization(
        &self,
        consent_id: &str,
    ) -> StorageResult<Option<PendingAuthorization>> {
        sqlx::query("DELETE FROM oauth2_pending_authorizations WHERE consent_id = $1 RETURNING *")
            .bind(consent_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_pending)
            .transpose()
    }

    async fn purge_expired_pending_authorizations(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let result =
            sqlx::query("DELETE FROM oauth2_pending_authorizations WHERE expires_at <= $1")
                .bind(to_millis(now))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_consents (user_id, client_id, scope, granted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(user_id, client_id) DO UPDATE SET
                scope = excluded.scope,
                granted_at = excluded.granted_at
            ",
        )
        .bind(&record.user_id)
        .bind(&record.client_id)
        .bind(record.scope.to_string())
        .bind(to_millis(record.granted_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_consent(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> StorageResult<Option<ConsentRecord>> {
        sqlx::query("SELECT * FROM oauth2_consents WHERE user_id = $1 AND client_id = $2")
            .bind(user_id)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_consent)
            .transpose()
    }

    async fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM oauth2_consents WHERE user_id = $1 AND client_id = $2")
            .bind(user_id)
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_consents(&self, user_id: &str) -> StorageResult<Vec<ConsentRecord>> {
        sqlx::query("SELECT * FROM oauth2_consents WHERE user_id = $1 ORDER BY client_id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_consent)
            .collect()
    }

    async fn create_family(&self, family: &TokenFamily) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_token_families
                (family_id, client_id, user_id, code_hash, created_at, revoked_at, revoked_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(family.family_id.to_string())
        .bind(&family.client_id)
        .bind(&family.user_id)
        .bind(&family.code_hash)
        .bind(to_millis(family.created_at))
        .bind(family.revoked_at.map(to_millis))
        .bind(&family.revoked_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_family(&self, family_id: Uuid) -> StorageResult<Option<TokenFamily>> {
        sqlx::query("SELECT * FROM oauth2_token_families WHERE family_id = $1")
            .bind(family_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_family)
            .transpose()
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE oauth2_token_families
            SET revoked_at = $1, revoked_reason = $2
            WHERE family_id = $3 AND revoked_at IS NULL
            ",
        )
        .bind(to_millis(now))
        .bind(reason)
        .bind(family_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_families_for_code(
        &self,
        code_hash: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Uuid>> {
        sqlx::query(
            r"
            UPDATE oauth2_token_families
            SET revoked_at = $1, revoked_reason = $2
            WHERE code_hash = $3 AND revoked_at IS NULL
            RETURNING family_id
            ",
        )
        .bind(to_millis(now))
        .bind(reason)
        .bind(code_hash)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| parse_uuid("oauth2_token_families", &row.try_get::<String, _>("family_id")?))
        .collect()
    }

    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_refresh_tokens
                (token_id, token_hash, family_id, client_id, user_id, scope, auth_time,
                 issued_at, expires_at, rotated_from, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(record.token_id.to_string())
        .bind(&record.token_hash)
        .bind(record.family_id.to_string())
        .bind(&record.client_id)
        .bind(&record.user_id)
        .bind(record.scope.to_string())
        .bind(to_millis(record.auth_time))
        .bind(to_millis(record.issued_at))
        .bind(to_millis(record.expires_at))
        .bind(record.rotated_from.map(|id| id.to_string()))
        .bind(record.consumed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<RefreshTokenRecord>> {
        sqlx::query("SELECT * FROM oauth2_refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_refresh_token)
            .transpose()
    }

    async fn get_refresh_token(&self, token_id: Uuid) -> StorageResult<Option<RefreshTokenRecord>> {
        sqlx::query("SELECT * FROM oauth2_refresh_tokens WHERE token_id = $1")
            .bind(token_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_refresh_token)
            .transpose()
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ConsumeOutcome<RefreshTokenRecord>> {
        let consumed = sqlx::query(
            r"
            UPDATE oauth2_refresh_tokens
            SET consumed_at = $1
            WHERE token_hash = $2 AND consumed_at IS NULL
            RETURNING *
            ",
        )
        .bind(to_millis(now))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = consumed {
            return Ok(ConsumeOutcome::Consumed(row_to_refresh_token(&row)?));
        }

        match self.find_refresh_token(token_hash).await? {
            Some(record) => Ok(ConsumeOutcome::AlreadyConsumed(record)),
            None => Ok(ConsumeOutcome::NotFound),
        }
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM oauth2_refresh_tokens WHERE expires_at <= $1")
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_stale_families(&self, created_before: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM oauth2_token_families
            WHERE created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM oauth2_refresh_tokens t
                  WHERE t.family_id = oauth2_token_families.family_id
              )
            ",
        )
        .bind(to_millis(created_before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_signing_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO signing_keys
                (kid, algorithm, state, private_key_pem, not_before, not_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&key.kid)
        .bind(&key.algorithm)
        .bind(key.state.as_str())
        .bind(&key.private_key_pem)
        .bind(to_millis(key.not_before))
        .bind(key.not_after.map(to_millis))
        .bind(to_millis(key.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_signing_keys(&self) -> StorageResult<Vec<SigningKeyRecord>> {
        sqlx::query("SELECT * FROM signing_keys ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_signing_key)
            .collect()
    }

    async fn active_signing_kid(&self) -> StorageResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT kid FROM signing_keys WHERE state = 'active'")
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn promote_signing_key(
        &self,
        kid: &str,
        retire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let state: Option<String> = sqlx::query_scalar("SELECT state FROM signing_keys WHERE kid = $1")
            .bind(kid)
            .fetch_optional(&mut *tx)
            .await?;
        match state.as_deref().map(KeyState::parse) {
            None => return Err(StorageError::NotFound(format!("signing key {kid}"))),
            Some(Some(KeyState::Pending)) => {}
            Some(other) => {
                return Err(StorageError::Conflict(format!(
                    "signing key {kid} is {}, only pending keys can be promoted",
                    other.map_or("unknown", |s| s.as_str())
                )))
            }
        }

        sqlx::query(
            "UPDATE signing_keys SET state = 'retiring', not_after = $1 WHERE state = 'active'",
        )
        .bind(to_millis(retire_at))
        .execute(&mut *tx)
        .await?;

        let promoted = sqlx::query(
            r"
            UPDATE signing_keys
            SET state = 'active', not_before = MIN(not_before, $1)
            WHERE kid = $2 AND state = 'pending'
            ",
        )
        .bind(to_millis(now))
        .bind(kid)
        .execute(&mut *tx)
        .await?;

        if promoted.rows_affected() != 1 {
            return Err(StorageError::Conflict(format!(
                "signing key {kid} changed state during promotion"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn expire_signing_keys(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        sqlx::query_scalar(
            r"
            UPDATE signing_keys
            SET state = 'expired'
            WHERE state = 'retiring' AND not_after IS NOT NULL AND not_after <= $1
            RETURNING kid
            ",
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)
    }
}
