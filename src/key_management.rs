// ABOUTME: Signing key lifecycle (pending -> active -> retiring -> expired) persisted through the store
// ABOUTME: Signs with the single active key, publishes the JWKS, and verifies RS256 tokens by kid
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! # Key Management
//!
//! The [`KeyManager`] owns every private key. It caches parsed key pairs behind a
//! `tokio::sync::RwLock` (one writer, many readers) and treats the store as the source of
//! truth, so several processes sharing one database agree on which key is active.
//!
//! Promotion is an operator action (`tollgate-admin keys promote`) or the one-time bootstrap
//! on an empty store. Signing never falls back to a non-active key.
//!
//! Another process may promote a key at any time. `sign` asks the store for the active kid
//! before every signature and reloads when the cache disagrees. `verify` reloads when a
//! token names a kid it has never seen, at most once per `UNKNOWN_KID_RELOAD_SECS`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task;
use tollgate_core::constants::keys::{
    RETIRING_OVERLAP_DAYS, RSA_KEY_SIZE, SIGNING_ALGORITHM, UNKNOWN_KID_RELOAD_SECS,
};
use tollgate_core::constants::ttl::JWT_LEEWAY_SECS;
use tollgate_core::errors::{AppError, AppResult, OAuth2Error};
use tollgate_core::models::{KeyState, SigningKeyRecord};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::JwtValidationError;
use crate::clock::SharedClock;
use crate::jwks::{JsonWebKeySet, RsaKeyPair};
use crate::storage::SharedStore;

/// Key manager settings
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Expected `iss` on verified tokens
    pub issuer: String,
    /// Modulus size for generated keys
    pub rsa_key_size: usize,
    /// How long a replaced key keeps verifying
    pub retiring_overlap: Duration,
    /// Clock-skew leeway for `exp`/`nbf`
    pub leeway_secs: u64,
}

impl KeyManagerConfig {
    /// Defaults for `issuer`
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            rsa_key_size: RSA_KEY_SIZE,
            retiring_overlap: Duration::days(RETIRING_OVERLAP_DAYS),
            leeway_secs: JWT_LEEWAY_SECS,
        }
    }
}

struct LoadedKey {
    record: SigningKeyRecord,
    pair: RsaKeyPair,
}

/// Summary of a key for operators; never carries private material
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    /// Key id
    pub kid: String,
    /// Lifecycle state
    pub state: KeyState,
    /// Validity start
    pub not_before: DateTime<Utc>,
    /// Validity end
    pub not_after: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&SigningKeyRecord> for KeySummary {
    fn from(record: &SigningKeyRecord) -> Self {
        Self {
            kid: record.kid.clone(),
            state: record.state,
            not_before: record.not_before,
            not_after: record.not_after,
            created_at: record.created_at,
        }
    }
}

/// Signing key lifecycle manager
pub struct KeyManager {
    store: SharedStore,
    clock: SharedClock,
    config: KeyManagerConfig,
    keys: RwLock<HashMap<String, LoadedKey>>,
    last_unknown_kid_reload: Mutex<Option<DateTime<Utc>>>,
}

impl KeyManager {
    /// Create a manager with an empty cache; call [`Self::reload`] before use
    #[must_use]
    pub fn new(store: SharedStore, clock: SharedClock, config: KeyManagerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            keys: RwLock::new(HashMap::new()),
            last_unknown_kid_reload: Mutex::new(None),
        }
    }

    /// Refresh the cache from the store.
    ///
    /// The read is idempotent, so a failed read is retried once. Key pairs already parsed are
    /// reused; only their lifecycle fields are refreshed. Expired keys are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if both store reads fail
    pub async fn reload(&self) -> AppResult<()> {
        let records = match self.store.list_signing_keys().await {
            Ok(records) => records,
            Err(first) => {
                warn!("Signing key reload failed, retrying once: {first}");
                self.store.list_signing_keys().await?
            }
        };

        let mut keys = self.keys.write().await;
        let mut refreshed = HashMap::with_capacity(records.len());
        for record in records {
            if record.state == KeyState::Expired {
                continue;
            }
            let pair = match keys.remove(&record.kid) {
                Some(existing) => existing.pair,
                None => match RsaKeyPair::from_pkcs8_pem(&record.kid, &record.private_key_pem) {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(kid = %record.kid, "Skipping unreadable signing key: {e}");
                        continue;
                    }
                },
            };
            refreshed.insert(record.kid.clone(), LoadedKey { record, pair });
        }
        *keys = refreshed;
        debug!(loaded = keys.len(), "Signing keys reloaded");
        drop(keys);
        Ok(())
    }

    /// Generate and promote a first key when the store holds no keys at all.
    ///
    /// Returns the new kid, or `None` when keys already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if generation, persistence, or promotion fails
    pub async fn bootstrap_if_empty(&self) -> AppResult<Option<String>> {
        if !self.store.list_signing_keys().await?.is_empty() {
            self.reload().await?;
            return Ok(None);
        }
        let kid = self.generate_pending().await?;
        self.promote(&kid).await?;
        info!(kid = %kid, "Bootstrapped initial signing key");
        Ok(Some(kid))
    }

    /// Generate a new pending key and persist it. Pending keys are published but never sign.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or persistence fails
    pub async fn generate_pending(&self) -> AppResult<String> {
        let kid = format!("key_{}", Uuid::new_v4().simple());
        let key_size = self.config.rsa_key_size;
        let pair = {
            let kid = kid.clone();
            task::spawn_blocking(move || RsaKeyPair::generate(&kid, key_size))
                .await
                .map_err(|e| AppError::internal(format!("Key generation task failed: {e}")))??
        };

        let now = self.clock.now();
        let record = SigningKeyRecord {
            kid: kid.clone(),
            algorithm: SIGNING_ALGORITHM.to_owned(),
            state: KeyState::Pending,
            private_key_pem: pair.export_private_key_pem()?.to_string(),
            not_before: now,
            not_after: None,
            created_at: now,
        };
        self.store.insert_signing_key(&record).await?;
        self.keys
            .write()
            .await
            .insert(kid.clone(), LoadedKey { record, pair });

        info!(kid = %kid, key_size, "Generated pending signing key");
        Ok(kid)
    }

    /// Promote a pending key to active; the previous active key starts retiring.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or not pending
    pub async fn promote(&self, kid: &str) -> AppResult<()> {
        let now = self.clock.now();
        let retire_at = now + self.config.retiring_overlap;
        self.store.promote_signing_key(kid, retire_at, now).await?;
        info!(kid = %kid, retire_previous_at = %retire_at, "Promoted signing key");
        self.reload().await
    }

    /// Move retiring keys past `not_after` to expired; returns their kids
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails
    pub async fn expire_retired(&self) -> AppResult<Vec<String>> {
        let expired = self.store.expire_signing_keys(self.clock.now()).await?;
        if !expired.is_empty() {
            info!(kids = ?expired, "Expired retired signing keys");
            self.reload().await?;
        }
        Ok(expired)
    }

    /// Lifecycle summaries for every cached key, oldest first
    pub async fn list(&self) -> Vec<KeySummary> {
        let keys = self.keys.read().await;
        let mut summaries: Vec<KeySummary> =
            keys.values().map(|k| KeySummary::from(&k.record)).collect();
        drop(keys);
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Kid of the active key, if any
    pub async fn active_kid(&self) -> Option<String> {
        let now = self.clock.now();
        self.keys
            .read()
            .await
            .values()
            .find(|k| k.record.state == KeyState::Active && k.record.is_within_validity(now))
            .map(|k| k.record.kid.clone())
    }

    /// Sign `claims` as an RS256 JWT with the active key.
    ///
    /// The store's active kid is checked first; a promotion made elsewhere triggers a reload.
    ///
    /// # Errors
    ///
    /// Returns `KeyUnavailable` when no key is active, never signing with another key
    pub async fn sign<T: Serialize + Sync>(&self, claims: &T) -> Result<String, OAuth2Error> {
        let stored_active = self.store.active_signing_kid().await?;
        if stored_active != self.active_kid().await {
            debug!(kid = ?stored_active, "Active signing key changed in the store");
            self.reload().await?;
        }

        let now = self.clock.now();
        let keys = self.keys.read().await;
        let Some(active) = keys
            .values()
            .find(|k| k.record.state == KeyState::Active && k.record.is_within_validity(now))
        else {
            error!("No active signing key; refusing to issue tokens");
            return Err(OAuth2Error::KeyUnavailable(
                "no active signing key".to_owned(),
            ));
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(active.record.kid.clone());
        encode(&header, claims, active.pair.encoding_key())
            .map_err(|e| OAuth2Error::KeyUnavailable(format!("signing failed: {e}")))
    }

    /// Public keys of every pending, active, or retiring key still inside its window
    pub async fn public_jwks(&self) -> JsonWebKeySet {
        let now = self.clock.now();
        let keys = self.keys.read().await;
        let mut published: Vec<&LoadedKey> = keys
            .values()
            .filter(|k| k.record.is_published(now))
            .collect();
        published.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
        JsonWebKeySet {
            keys: published.iter().map(|k| k.pair.to_jwk()).collect(),
        }
    }

    /// Verify an RS256 token issued by this server.
    ///
    /// The key is found by the `kid` header and must be inside its validity window. `exp` and
    /// `nbf` are checked against the server clock with the configured leeway.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtValidationError`] describing why the token was rejected
    pub async fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<T, JwtValidationError> {
        let header = decode_header(token).map_err(|e| JwtValidationError::TokenMalformed {
            details: e.to_string(),
        })?;
        if header.alg != Algorithm::RS256 {
            return Err(JwtValidationError::TokenInvalid {
                reason: format!("unsupported algorithm {:?}", header.alg),
            });
        }
        let kid = header.kid.ok_or_else(|| JwtValidationError::TokenMalformed {
            details: "missing kid header".to_owned(),
        })?;

        let now = self.clock.now();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let known = self.keys.read().await.contains_key(&kid);
        if !known && self.claim_unknown_kid_reload(now).await {
            debug!(kid = %kid, "Unknown kid, reloading signing keys");
            if let Err(e) = self.reload().await {
                warn!("Signing key reload failed: {e}");
            }
        }

        let claims = {
            let keys = self.keys.read().await;
            let key = keys
                .get(&kid)
                .filter(|k| k.record.is_within_validity(now))
                .ok_or_else(|| JwtValidationError::TokenInvalid {
                    reason: format!("unknown or expired signing key {kid}"),
                })?;
            decode::<Map<String, Value>>(token, key.pair.decoding_key(), &validation)
                .map_err(|e| JwtValidationError::TokenInvalid {
                    reason: e.to_string(),
                })?
                .claims
        };

        self.check_time_claims(&claims, now)?;
        serde_json::from_value(Value::Object(claims)).map_err(|e| {
            JwtValidationError::TokenMalformed {
                details: e.to_string(),
            }
        })
    }

    async fn claim_unknown_kid_reload(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_unknown_kid_reload.lock().await;
        let due = !last.is_some_and(|at| now - at < Duration::seconds(UNKNOWN_KID_RELOAD_SECS));
        if due {
            *last = Some(now);
        }
        drop(last);
        due
    }

    fn check_time_claims(
        &self,
        claims: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), JwtValidationError> {
        let leeway = i64::try_from(self.config.leeway_secs).unwrap_or(i64::MAX);
        let current = now.timestamp();

        let exp = claims.get("exp").and_then(Value::as_i64).ok_or_else(|| {
            JwtValidationError::TokenMalformed {
                details: "missing exp claim".to_owned(),
            }
        })?;
        if current >= exp.saturating_add(leeway) {
            return Err(JwtValidationError::TokenExpired {
                expired_at: DateTime::from_timestamp(exp, 0).unwrap_or(now),
                current_time: now,
            });
        }
        if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
            if current < nbf.saturating_sub(leeway) {
                return Err(JwtValidationError::TokenInvalid {
                    reason: "token not yet valid".to_owned(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::MemoryStore;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Serialize, Deserialize)]
    struct TestClaims {
        iss: String,
        sub: String,
        exp: i64,
    }

    fn manager(clock: &Arc<ManualClock>) -> KeyManager {
        manager_on(Arc::new(MemoryStore::new()), clock)
    }

    fn manager_on(store: SharedStore, clock: &Arc<ManualClock>) -> KeyManager {
        let mut config = KeyManagerConfig::new("https://issuer.test");
        config.rsa_key_size = 2048;
        KeyManager::new(store, clock.clone(), config)
    }

    fn claims(clock: &ManualClock, ttl: i64) -> TestClaims {
        TestClaims {
            iss: "https://issuer.test".to_owned(),
            sub: "user-1".to_owned(),
            exp: clock.now().timestamp() + ttl,
        }
    }

    #[tokio::test]
    async fn test_sign_without_active_key_is_key_unavailable() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let keys = manager(&clock);
        keys.generate_pending().await.unwrap();

        let result = keys.sign(&claims(&clock, 60)).await;
        assert!(matches!(result, Err(OAuth2Error::KeyUnavailable(_))));
        assert_eq!(keys.public_jwks().await.keys.len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_tokens_verifiable_until_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let keys = manager(&clock);
        let first = keys.bootstrap_if_empty().await.unwrap().unwrap();
        let old_token = keys.sign(&claims(&clock, 30 * 86_400)).await.unwrap();

        let second = keys.generate_pending().await.unwrap();
        keys.promote(&second).await.unwrap();
        assert_eq!(keys.active_kid().await.as_deref(), Some(second.as_str()));

        let verified: TestClaims = keys.verify(&old_token, None).await.unwrap();
        assert_eq!(verified.sub, "user-1");
        let jwks = keys.public_jwks().await;
        assert!(jwks.find(&first).is_some());

        clock.advance(Duration::days(RETIRING_OVERLAP_DAYS) + Duration::seconds(1));
        assert_eq!(keys.expire_retired().await.unwrap(), vec![first.clone()]);
        assert!(keys.public_jwks().await.find(&first).is_none());
        assert!(keys.verify::<TestClaims>(&old_token, None).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected_after_leeway() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let keys = manager(&clock);
        keys.bootstrap_if_empty().await.unwrap();
        let token = keys.sign(&claims(&clock, 10)).await.unwrap();

        clock.advance(Duration::seconds(30));
        assert!(keys.verify::<TestClaims>(&token, None).await.is_ok());

        clock.advance(Duration::seconds(60));
        assert!(matches!(
            keys.verify::<TestClaims>(&token, None).await,
            Err(JwtValidationError::TokenExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_is_noop_when_keys_exist() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let keys = manager(&clock);
        assert!(keys.bootstrap_if_empty().await.unwrap().is_some());
        assert!(keys.bootstrap_if_empty().await.unwrap().is_none());
        assert_eq!(
            keys.list()
                .await
                .iter()
                .filter(|k| k.state == KeyState::Active)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_promotion_elsewhere_is_seen_by_sign_and_verify() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: SharedStore = Arc::new(MemoryStore::new());
        let node_a = manager_on(store.clone(), &clock);
        let node_b = manager_on(store, &clock);

        let first = node_a.bootstrap_if_empty().await.unwrap().unwrap();
        node_b.reload().await.unwrap();
        assert_eq!(node_b.active_kid().await.as_deref(), Some(first.as_str()));

        let second = node_a.generate_pending().await.unwrap();
        node_a.promote(&second).await.unwrap();

        // B has never loaded the new key but accepts tokens signed with it
        let token = node_a.sign(&claims(&clock, 60)).await.unwrap();
        assert_eq!(decode_header(&token).unwrap().kid.as_deref(), Some(second.as_str()));
        let verified: TestClaims = node_b.verify(&token, None).await.unwrap();
        assert_eq!(verified.sub, "user-1");

        // and B stops signing with the key the store now marks retiring
        let token = node_b.sign(&claims(&clock, 60)).await.unwrap();
        assert_eq!(decode_header(&token).unwrap().kid.as_deref(), Some(second.as_str()));
        assert!(node_a.verify::<TestClaims>(&token, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_reloads_when_promotion_happened_after_cache_load() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: SharedStore = Arc::new(MemoryStore::new());
        let admin = manager_on(store.clone(), &clock);
        let server = manager_on(store, &clock);

        let pending = admin.generate_pending().await.unwrap();
        server.reload().await.unwrap();
        assert!(server.active_kid().await.is_none());

        admin.promote(&pending).await.unwrap();
        let token = server.sign(&claims(&clock, 60)).await.unwrap();
        assert_eq!(decode_header(&token).unwrap().kid.as_deref(), Some(pending.as_str()));
    }
}
