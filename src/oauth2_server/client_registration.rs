// ABOUTME: Client registry merging statically configured clients with RFC 7591 dynamic registrations
// ABOUTME: Authenticates clients at the token endpoint with Argon2-hashed secrets
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tokio::task;
use tollgate_core::constants::{auth_methods, grant_types};
use tollgate_core::errors::{AppError, AppResult, OAuth2Error, StorageError};
use tollgate_core::models::{ClientType, OAuth2Client, ScopeSet};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::models::{ClientRegistrationRequest, ClientRegistrationResponse};
use crate::clock::SharedClock;
use crate::config::StaticClientsConfig;
use crate::crypto::random::generate_random_string;
use crate::storage::SharedStore;

/// Bytes of entropy in issued client secrets
const CLIENT_SECRET_BYTES: usize = 32;

/// Hash a client secret for storage using Argon2id with a random salt
///
/// # Errors
///
/// Returns an error if Argon2 hashing fails
pub fn hash_client_secret(secret: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::crypto(format!("Argon2 password hashing failed: {e}")))
}

/// Hash checked when the client id is unknown, so both paths cost one Argon2 verify
fn unknown_client_hash() -> Option<&'static str> {
    static HASH: OnceLock<Option<String>> = OnceLock::new();
    HASH.get_or_init(|| hash_client_secret("unknown-client").ok())
        .as_deref()
}

fn verify_client_secret(client_id: &str, secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        warn!(client_id = %client_id, "Stored client secret hash is unreadable");
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Client registry and authenticator
pub struct ClientRegistrationManager {
    store: SharedStore,
    clock: SharedClock,
    static_clients: RwLock<Arc<HashMap<String, OAuth2Client>>>,
    /// Ceiling for dynamically registered clients, and their scope when they request none
    registrable_scopes: ScopeSet,
}

impl ClientRegistrationManager {
    /// Create a manager with the given static clients.
    ///
    /// Dynamic registrations may only ask for scopes in `registrable_scopes`.
    #[must_use]
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        static_clients: Vec<OAuth2Client>,
        registrable_scopes: ScopeSet,
    ) -> Self {
        Self {
            store,
            clock,
            static_clients: RwLock::new(Arc::new(index(static_clients))),
            registrable_scopes,
        }
    }

    fn snapshot(&self) -> Arc<HashMap<String, OAuth2Client>> {
        self.static_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the static registry (SIGHUP). In-flight requests keep the snapshot they read.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is invalid; the previous registry stays in place
    pub fn reload(&self, config: StaticClientsConfig) -> AppResult<usize> {
        let clients = config.into_clients(self.clock.now())?;
        let count = clients.len();
        *self
            .static_clients
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(index(clients));
        info!(clients = count, "Static client registry reloaded");
        Ok(count)
    }

    /// Look up a client: static registry first, then dynamic registrations
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails
    pub async fn get_client(&self, client_id: &str) -> Result<Option<OAuth2Client>, StorageError> {
        if let Some(client) = self.snapshot().get(client_id) {
            return Ok(Some(client.clone()));
        }
        self.store.get_client(client_id).await
    }

    /// Authenticate a client at the token, revocation, or introspection endpoint.
    ///
    /// Confidential clients must present their secret. Public clients must not present one.
    /// An unknown client id presenting a secret still pays for one Argon2 verify.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` on any failure without revealing which check failed
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<OAuth2Client, OAuth2Error> {
        let invalid = || OAuth2Error::InvalidClient("Client authentication failed".to_owned());

        let Some(client) = self.get_client(client_id).await? else {
            debug!(client_id = %client_id, "Unknown client");
            if let Some(secret) = secret {
                let secret = secret.to_owned();
                let _ = task::spawn_blocking(move || {
                    unknown_client_hash()
                        .is_some_and(|hash| verify_client_secret("unknown", &secret, hash))
                })
                .await;
            }
            return Err(invalid());
        };
        if client.disabled {
            warn!(client_id = %client_id, "Disabled client attempted authentication");
            return Err(invalid());
        }

        match (client.client_type, secret, client.client_secret_hash.as_deref()) {
            (ClientType::Public, None, _) => Ok(client),
            (ClientType::Confidential, Some(secret), Some(hash)) => {
                let client_id = client.client_id.clone();
                let secret = secret.to_owned();
                let hash = hash.to_owned();
                let verified = task::spawn_blocking(move || {
                    verify_client_secret(&client_id, &secret, &hash)
                })
                .await
                .map_err(|e| OAuth2Error::ServerError(format!("secret check failed: {e}")))?;
                if verified {
                    Ok(client)
                } else {
                    warn!(client_id = %client.client_id, "Client secret validation failed");
                    Err(invalid())
                }
            }
            _ => {
                warn!(client_id = %client.client_id, "Client authentication method mismatch");
                Err(invalid())
            }
        }
    }

    /// Register a client (RFC 7591). Dynamic clients are never trusted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for unacceptable metadata, `InvalidScope` for scopes the server
    /// does not offer, or a server error if storage fails
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        validate_registration_request(&request)?;

        let auth_method = request
            .token_endpoint_auth_method
            .clone()
            .unwrap_or_else(|| auth_methods::CLIENT_SECRET_BASIC.to_owned());
        let client_type = if auth_method == auth_methods::NONE {
            ClientType::Public
        } else {
            ClientType::Confidential
        };

        let granted = request
            .grant_types
            .clone()
            .unwrap_or_else(OAuth2Client::default_grant_types);
        if client_type == ClientType::Public
            && granted.iter().any(|g| g == grant_types::CLIENT_CREDENTIALS)
        {
            return Err(OAuth2Error::InvalidRequest(
                "public clients cannot use client_credentials".to_owned(),
            ));
        }

        let allowed_scopes = request
            .scope
            .as_deref()
            .map_or_else(|| self.registrable_scopes.clone(), ScopeSet::parse);
        let unsupported = allowed_scopes.difference(&self.registrable_scopes);
        if !unsupported.is_empty() {
            warn!(scopes = ?unsupported, "Registration requested unsupported scopes");
            return Err(OAuth2Error::InvalidScope(format!(
                "unsupported scope: {}",
                unsupported.join(" ")
            )));
        }

        let (client_secret, client_secret_hash) = if client_type == ClientType::Confidential {
            let secret = generate_random_string(CLIENT_SECRET_BYTES)?;
            let to_hash = secret.clone();
            let hash = task::spawn_blocking(move || hash_client_secret(&to_hash))
                .await
                .map_err(|e| OAuth2Error::ServerError(format!("secret hashing failed: {e}")))??;
            (Some(secret), Some(hash))
        } else {
            (None, None)
        };

        let now = self.clock.now();
        let client = OAuth2Client {
            client_id: format!("client_{}", Uuid::new_v4().simple()),
            client_secret_hash,
            redirect_uris: request.redirect_uris.clone(),
            allowed_scopes,
            client_type,
            trusted: false,
            disabled: false,
            client_name: request.client_name.clone(),
            grant_types: granted,
            created_at: now,
        };
        self.store.store_client(&client).await?;
        info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            "Registered OAuth2 client"
        );

        Ok(ClientRegistrationResponse {
            client_id: client.client_id,
            client_secret_expires_at: client_secret.as_ref().map(|_| 0),
            client_secret,
            client_id_issued_at: now.timestamp(),
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            response_types: vec!["code".to_owned()],
            client_name: client.client_name,
            scope: client.allowed_scopes.to_string(),
            token_endpoint_auth_method: auth_method,
        })
    }
}

fn index(clients: Vec<OAuth2Client>) -> HashMap<String, OAuth2Client> {
    clients
        .into_iter()
        .map(|c| (c.client_id.clone(), c))
        .collect()
}

fn validate_registration_request(request: &ClientRegistrationRequest) -> Result<(), OAuth2Error> {
    if request.redirect_uris.is_empty() {
        return Err(OAuth2Error::InvalidRequest(
            "At least one redirect_uri is required".to_owned(),
        ));
    }
    if let Some(uri) = request
        .redirect_uris
        .iter()
        .find(|uri| !is_valid_redirect_uri(uri))
    {
        return Err(OAuth2Error::InvalidRequest(format!(
            "Invalid redirect_uri: {uri}"
        )));
    }

    if let Some(unsupported) = request.grant_types.iter().flatten().find(|g| {
        !matches!(
            g.as_str(),
            grant_types::AUTHORIZATION_CODE
                | grant_types::REFRESH_TOKEN
                | grant_types::CLIENT_CREDENTIALS
        )
    }) {
        return Err(OAuth2Error::InvalidRequest(format!(
            "Unsupported grant_type: {unsupported}"
        )));
    }

    if let Some(unsupported) = request.response_types.iter().flatten().find(|r| *r != "code") {
        return Err(OAuth2Error::InvalidRequest(format!(
            "Unsupported response_type: {unsupported}"
        )));
    }

    if let Some(method) = request.token_endpoint_auth_method.as_deref() {
        if !matches!(
            method,
            auth_methods::NONE | auth_methods::CLIENT_SECRET_BASIC | auth_methods::CLIENT_SECRET_POST
        ) {
            return Err(OAuth2Error::InvalidRequest(format!(
                "Unsupported token_endpoint_auth_method: {method}"
            )));
        }
    }

    if let Some(scope) = request.scope.as_deref() {
        if ScopeSet::parse(scope).is_empty() {
            return Err(OAuth2Error::InvalidScope("scope must not be empty".to_owned()));
        }
    }
    Ok(())
}

/// Absolute URI without fragment or wildcard; `https`, or `http` on loopback only
fn is_valid_redirect_uri(uri: &str) -> bool {
    if uri.trim().is_empty() || uri.contains('#') || uri.contains('*') {
        warn!("Rejected redirect_uri with fragment or wildcard: {uri}");
        return false;
    }
    let Ok(parsed) = Url::parse(uri) else {
        warn!("Rejected malformed redirect_uri: {uri}");
        return false;
    };
    let loopback = matches!(
        parsed.host_str(),
        Some("localhost" | "127.0.0.1" | "[::1]")
    );
    match parsed.scheme() {
        "https" => true,
        "http" if loopback => true,
        _ => {
            warn!("Rejected redirect_uri with non-HTTPS scheme for non-loopback host: {uri}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::MemoryStore;

    #[test]
    fn test_redirect_uri_rules() {
        assert!(is_valid_redirect_uri("https://app.example/cb"));
        assert!(is_valid_redirect_uri("http://localhost:3000/cb"));
        assert!(is_valid_redirect_uri("http://127.0.0.1/cb"));
        assert!(!is_valid_redirect_uri("http://app.example/cb"));
        assert!(!is_valid_redirect_uri("https://app.example/cb#frag"));
        assert!(!is_valid_redirect_uri("https://*.example/cb"));
        assert!(!is_valid_redirect_uri("not a uri"));
    }

    #[test]
    fn test_secret_hash_round_trip() {
        let hash = hash_client_secret("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_client_secret("c", "s3cret", &hash));
        assert!(!verify_client_secret("c", "wrong", &hash));
    }

    #[tokio::test]
    async fn test_unknown_client_with_secret_is_rejected_after_dummy_verify() {
        let manager = ClientRegistrationManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Vec::new(),
            ScopeSet::parse("openid"),
        );
        let result = manager.authenticate("client_missing", Some("guess")).await;
        assert!(matches!(result, Err(OAuth2Error::InvalidClient(_))));

        let dummy = unknown_client_hash().unwrap();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(!verify_client_secret("c", "guess", dummy));
    }
}
