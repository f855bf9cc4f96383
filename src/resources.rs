// ABOUTME: Shared server resources wiring the store, clock, keys, and OAuth2 components together
// ABOUTME: Built once at startup (or per test) and shared with HTTP handlers through Arc
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::sync::Arc;

use tollgate_core::errors::AppResult;
use tollgate_core::models::OAuth2Client;
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{ServerConfig, StaticClientsConfig};
use crate::key_management::{KeyManager, KeyManagerConfig};
use crate::notifications::{LogSecurityEventSink, SharedEventSink};
use crate::oauth2_server::{
    AuthorizationCodeStore, AuthorizationServerComponents, ClientRegistrationManager,
    ConsentLedger, OAuth2AuthorizationServer, OAuth2Hooks, OAuth2RateLimiter,
    RevocationRegistry, TokenIssuer, TokenIssuerDeps,
};
use crate::storage::{self, SharedStore};

/// Everything the HTTP layer and background tasks share
pub struct ServerResources {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Storage
    pub store: SharedStore,
    /// Time source
    pub clock: SharedClock,
    /// Security event sink
    pub events: SharedEventSink,
    /// Signing keys
    pub keys: Arc<KeyManager>,
    /// Client registry
    pub clients: Arc<ClientRegistrationManager>,
    /// Family revocation
    pub revocation: Arc<RevocationRegistry>,
    /// Consent ledger
    pub consent: Arc<ConsentLedger>,
    /// Authorization codes
    pub codes: Arc<AuthorizationCodeStore>,
    /// Token issuer
    pub tokens: Arc<TokenIssuer>,
    /// Authorization server facade
    pub oauth2: Arc<OAuth2AuthorizationServer>,
    /// Endpoint rate limiter
    pub rate_limiter: OAuth2RateLimiter,
}

impl ServerResources {
    /// Reload the static client registry from the configured file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or describes invalid clients
    pub fn reload_static_clients(&self) -> AppResult<usize> {
        let Some(path) = self.config.clients_file.as_deref() else {
            return Ok(0);
        };
        let config = StaticClientsConfig::load(path)?;
        self.clients.reload(config)
    }
}

/// Builder for [`ServerResources`]
pub struct ServerResourcesBuilder {
    config: ServerConfig,
    store: Option<SharedStore>,
    clock: Option<SharedClock>,
    events: Option<SharedEventSink>,
    hooks: OAuth2Hooks,
    static_clients: Option<Vec<OAuth2Client>>,
}

impl ServerResourcesBuilder {
    /// Start from `config`; the store, clock, and sink default to those the config names
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            events: None,
            hooks: OAuth2Hooks::default(),
            static_clients: None,
        }
    }

    /// Use an already opened store instead of `database_url`
    #[must_use]
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific security event sink
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Install extension hooks
    #[must_use]
    pub fn with_hooks(mut self, hooks: OAuth2Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use these static clients instead of `clients_file`
    #[must_use]
    pub fn with_static_clients(mut self, clients: Vec<OAuth2Client>) -> Self {
        self.static_clients = Some(clients);
        self
    }

    /// Open the store, load clients and keys, and wire every component
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, the client file is invalid, or the
    /// signing keys cannot be loaded
    pub async fn build(self) -> AppResult<ServerResources> {
        let config = Arc::new(self.config);
        let store = match self.store {
            Some(store) => store,
            None => storage::connect(&config.database_url, config.store_timeout()).await?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(LogSecurityEventSink));
        let hooks = Arc::new(self.hooks);

        let static_clients = match (self.static_clients, config.clients_file.as_deref()) {
            (Some(clients), _) => clients,
            (None, Some(path)) => StaticClientsConfig::load(path)?.into_clients(clock.now())?,
            (None, None) => Vec::new(),
        };
        info!(count = static_clients.len(), "Loaded static clients");

        let keys = Arc::new(KeyManager::new(
            store.clone(),
            clock.clone(),
            KeyManagerConfig {
                issuer: config.issuer.clone(),
                rsa_key_size: config.rsa_key_size,
                retiring_overlap: config.key_overlap(),
                ..KeyManagerConfig::new(config.issuer.clone())
            },
        ));
        keys.reload().await?;

        let clients = Arc::new(ClientRegistrationManager::new(
            store.clone(),
            clock.clone(),
            static_clients,
            config.scopes_supported.clone(),
        ));
        let revocation = Arc::new(RevocationRegistry::new(
            store.clone(),
            clock.clone(),
            events.clone(),
        ));
        let consent = Arc::new(ConsentLedger::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            config.consent_ttl(),
            config.lifetimes.pending_consent(),
        ));
        let codes = Arc::new(AuthorizationCodeStore::new(
            store.clone(),
            clock.clone(),
            revocation.clone(),
            events.clone(),
            config.lifetimes.auth_code(),
        ));
        let tokens = Arc::new(TokenIssuer::new(
            TokenIssuerDeps {
                store: store.clone(),
                clock: clock.clone(),
                keys: keys.clone(),
                codes: codes.clone(),
                revocation: revocation.clone(),
                events: events.clone(),
                hooks: hooks.clone(),
            },
            config.issuer.clone(),
            config.lifetimes,
        ));
        let oauth2 = Arc::new(OAuth2AuthorizationServer::new(AuthorizationServerComponents {
            config: config.clone(),
            clock: clock.clone(),
            store: store.clone(),
            clients: clients.clone(),
            consent: consent.clone(),
            codes: codes.clone(),
            tokens: tokens.clone(),
            keys: keys.clone(),
            revocation: revocation.clone(),
            hooks,
        }));
        let rate_limiter = OAuth2RateLimiter::new(config.rate_limit);

        Ok(ServerResources {
            config,
            store,
            clock,
            events,
            keys,
            clients,
            revocation,
            consent,
            codes,
            tokens,
            oauth2,
            rate_limiter,
        })
    }

    /// Build wrapped in an `Arc`
    ///
    /// # Errors
    ///
    /// See [`Self::build`]
    pub async fn build_arc(self) -> AppResult<Arc<ServerResources>> {
        Ok(Arc::new(self.build().await?))
    }
}

impl From<ServerConfig> for ServerResourcesBuilder {
    fn from(config: ServerConfig) -> Self {
        Self::new(config)
    }
}
