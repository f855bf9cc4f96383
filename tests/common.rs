// ABOUTME: Shared test utilities for Tollgate integration tests
// ABOUTME: Builds servers on a manual clock with cached RSA keys, seeded clients, and HTTP helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `tollgate`

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex, Once, OnceLock};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tollgate::clock::{Clock, ManualClock};
use tollgate::config::ServerConfig;
use tollgate::crypto::pkce;
use tollgate::crypto::random::generate_random_string;
use tollgate::jwks::RsaKeyPair;
use tollgate::notifications::{SecurityEvent, SecurityEventSink};
use tollgate::oauth2_server::client_registration::hash_client_secret;
use tollgate::oauth2_server::OAuth2Hooks;
use tollgate::resources::{ServerResources, ServerResourcesBuilder};
use tollgate::server::build_router;
use tollgate::storage::{MemoryStore, SharedStore};
use tollgate_core::constants::grant_types;
use tollgate_core::constants::keys::SIGNING_ALGORITHM;
use tollgate_core::models::{ClientType, KeyState, OAuth2Client, ScopeSet, SigningKeyRecord};
use tower::ServiceExt;
use tracing::Level;
use url::Url;

pub const ISSUER: &str = "https://auth.tollgate.test";
pub const WEB_CLIENT: &str = "web-app";
pub const WEB_SECRET: &str = "web-app-secret";
pub const WEB_REDIRECT: &str = "https://app.example.com/callback";
pub const SPA_CLIENT: &str = "spa";
pub const SPA_REDIRECT: &str = "https://spa.example.com/cb";
pub const TRUSTED_CLIENT: &str = "first-party";
pub const TRUSTED_SECRET: &str = "first-party-secret";
pub const TRUSTED_REDIRECT: &str = "https://portal.example.com/cb";
pub const SERVICE_CLIENT: &str = "reporting-job";
pub const SERVICE_SECRET: &str = "reporting-job-secret";
pub const USER: &str = "alice";
pub const USER_HEADER: &str = "x-authenticated-user";

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Two RSA keys generated once per test process
pub fn shared_key_pems() -> &'static [String; 2] {
    static PEMS: OnceLock<[String; 2]> = OnceLock::new();
    PEMS.get_or_init(|| {
        let generate = |kid: &str| {
            RsaKeyPair::generate(kid, 2048)
                .unwrap()
                .export_private_key_pem()
                .unwrap()
                .to_string()
        };
        [generate("shared-1"), generate("shared-2")]
    })
}

/// Secret hashes computed once per test process
fn secret_hash(secret: &str) -> String {
    static HASHES: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    let hashes = HASHES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = hashes.lock().unwrap();
    guard
        .entry(secret.to_owned())
        .or_insert_with(|| hash_client_secret(secret).unwrap())
        .clone()
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn client(
    client_id: &str,
    secret: Option<&str>,
    redirect_uris: &[&str],
    scopes: &str,
    trusted: bool,
) -> OAuth2Client {
    OAuth2Client {
        client_id: client_id.to_owned(),
        client_secret_hash: secret.map(secret_hash),
        redirect_uris: redirect_uris.iter().map(|u| (*u).to_owned()).collect(),
        allowed_scopes: ScopeSet::parse(scopes),
        client_type: if secret.is_some() {
            ClientType::Confidential
        } else {
            ClientType::Public
        },
        trusted,
        disabled: false,
        client_name: Some(format!("{client_id} (test)")),
        grant_types: OAuth2Client::default_grant_types(),
        created_at: epoch(),
    }
}

/// Confidential third-party web app, consent required
pub fn web_client() -> OAuth2Client {
    client(
        WEB_CLIENT,
        Some(WEB_SECRET),
        &[WEB_REDIRECT, "https://app.example.com/other"],
        "openid profile email offline_access orders:read orders:write",
        false,
    )
}

/// Public single-page app, PKCE S256 required
pub fn spa_client() -> OAuth2Client {
    client(
        SPA_CLIENT,
        None,
        &[SPA_REDIRECT],
        "openid profile orders:read",
        false,
    )
}

/// First-party confidential client that skips consent
pub fn trusted_client() -> OAuth2Client {
    client(
        TRUSTED_CLIENT,
        Some(TRUSTED_SECRET),
        &[TRUSTED_REDIRECT],
        "openid profile email orders:read",
        true,
    )
}

/// Machine client allowed only the client credentials grant
pub fn service_client() -> OAuth2Client {
    let mut service = client(
        SERVICE_CLIENT,
        Some(SERVICE_SECRET),
        &["https://jobs.example.com/unused"],
        "openid reports:read",
        true,
    );
    service.grant_types = vec![grant_types::CLIENT_CREDENTIALS.to_owned()];
    service
}

/// Security events captured for assertions
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl SecurityEventSink for RecordingEventSink {
    async fn emit(&self, event: SecurityEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A fully wired server on a manual clock
pub struct TestServer {
    pub resources: Arc<ServerResources>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingEventSink>,
    pub router: Router,
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::for_issuer(ISSUER);
    config.login_url = "https://login.example.com/signin".to_owned();
    config.consent_url = "https://login.example.com/consent".to_owned();
    config.rate_limit.enabled = false;
    config.scopes_supported =
        ScopeSet::parse("openid profile email offline_access orders:read reports:read");
    config
}

/// Options for [`TestServer::build`]
pub struct TestServerOptions {
    pub config: ServerConfig,
    pub store: Option<SharedStore>,
    pub hooks: OAuth2Hooks,
    pub clients: Vec<OAuth2Client>,
    pub with_active_key: bool,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            config: test_config(),
            store: None,
            hooks: OAuth2Hooks::default(),
            clients: vec![web_client(), spa_client(), trusted_client(), service_client()],
            with_active_key: true,
        }
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::build(TestServerOptions::default()).await
    }

    pub async fn with_store(store: SharedStore) -> Self {
        Self::build(TestServerOptions {
            store: Some(store),
            ..TestServerOptions::default()
        })
        .await
    }

    pub async fn build(options: TestServerOptions) -> Self {
        init_test_logging();
        let clock = Arc::new(ManualClock::new(epoch()));
        let events = Arc::new(RecordingEventSink::default());
        let store = options
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as SharedStore);

        let resources = ServerResourcesBuilder::new(options.config)
            .with_store(store)
            .with_clock(clock.clone())
            .with_event_sink(events.clone())
            .with_hooks(options.hooks)
            .with_static_clients(options.clients)
            .build_arc()
            .await
            .unwrap();

        let server = Self {
            router: build_router(&resources),
            resources,
            clock,
            events,
        };
        if options.with_active_key {
            server.add_key("kid-1", 0).await;
            server.resources.keys.promote("kid-1").await.unwrap();
        }
        server
    }

    /// Insert a pending key using one of the cached PEMs
    pub async fn add_key(&self, kid: &str, pem_index: usize) {
        let now = self.clock.now();
        self.resources
            .store
            .insert_signing_key(&SigningKeyRecord {
                kid: kid.to_owned(),
                algorithm: SIGNING_ALGORITHM.to_owned(),
                state: KeyState::Pending,
                private_key_pem: shared_key_pems()[pem_index].clone(),
                not_before: now,
                not_after: None,
                created_at: now,
            })
            .await
            .unwrap();
        self.resources.keys.reload().await.unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// `GET /authorize` with the given parameters, optionally as a logged-in user
    pub async fn authorize(&self, params: &[(&str, &str)], user: Option<&str>) -> Response {
        let query = serde_urlencoded::to_string(params).unwrap();
        let mut builder = Request::get(format!("/authorize?{query}"));
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Form `POST` with optional HTTP Basic credentials; returns status and JSON body
    pub async fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        basic: Option<(&str, &str)>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::post(path).header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((id, secret)) = basic {
            let encoded = STANDARD.encode(format!("{id}:{secret}"));
            builder = builder.header(AUTHORIZATION, format!("Basic {encoded}"));
        }
        let body = serde_urlencoded::to_string(fields).unwrap();
        let response = self.send(builder.body(Body::from(body)).unwrap()).await;
        json_parts(response).await
    }

    /// JSON `POST`
    pub async fn post_json(&self, path: &str, body: &Value, user: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::post(path).header(CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        let response = self
            .send(builder.body(Body::from(body.to_string())).unwrap())
            .await;
        json_parts(response).await
    }

    /// `GET` with an optional bearer token
    pub async fn get(&self, path: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::get(path);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = self.send(builder.body(Body::empty()).unwrap()).await;
        json_parts(response).await
    }

    /// `GET` as a logged-in end user
    pub async fn get_as_user(&self, path: &str, user: &str) -> (StatusCode, Value) {
        let request = Request::get(path)
            .header(USER_HEADER, user)
            .body(Body::empty())
            .unwrap();
        json_parts(self.send(request).await).await
    }

    /// Record consent for `user` so the next authorization skips the screen
    pub async fn grant_consent(&self, user: &str, client_id: &str, scope: &str) {
        self.resources
            .consent
            .record_consent(user, client_id, &ScopeSet::parse(scope), true)
            .await
            .unwrap();
    }

    /// Run `/authorize` for a client whose consent already exists and return the code
    pub async fn authorize_code(&self, params: &[(&str, &str)], user: &str) -> String {
        let response = self.authorize(params, Some(user)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let query = location_query(&response);
        query
            .get("code")
            .cloned()
            .unwrap_or_else(|| panic!("no code in redirect: {query:?}"))
    }

    /// Exchange a code with the web client's Basic credentials
    pub async fn exchange_web_code(&self, code: &str, verifier: &str) -> (StatusCode, Value) {
        self.post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", WEB_REDIRECT),
                ("code_verifier", verifier),
            ],
            Some((WEB_CLIENT, WEB_SECRET)),
        )
        .await
    }

    /// Full web-client flow (consent pre-recorded) returning the token response
    pub async fn web_tokens(&self, scope: &str) -> Value {
        self.grant_consent(USER, WEB_CLIENT, scope).await;
        let pkce = Pkce::new();
        let code = self
            .authorize_code(&pkce.authorize_params(WEB_CLIENT, WEB_REDIRECT, scope), USER)
            .await;
        let (status, body) = self.exchange_web_code(&code, &pkce.verifier).await;
        assert_eq!(status, StatusCode::OK, "token exchange failed: {body}");
        body
    }

    /// Refresh with the web client's Basic credentials
    pub async fn refresh_web(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.post_form(
            "/token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)],
            Some((WEB_CLIENT, WEB_SECRET)),
        )
        .await
    }
}

/// PKCE verifier and S256 challenge
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn new() -> Self {
        let verifier = generate_random_string(32).unwrap();
        let challenge = pkce::s256_challenge(&verifier);
        Self { verifier, challenge }
    }

    pub fn authorize_params<'a>(
        &'a self,
        client_id: &'a str,
        redirect_uri: &'a str,
        scope: &'a str,
    ) -> Vec<(&'a str, &'a str)> {
        vec![
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("state", "xyz-state"),
            ("code_challenge", &self.challenge),
            ("code_challenge_method", "S256"),
        ]
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

/// Location header of a redirect
pub fn location(response: &Response) -> Url {
    let raw = response
        .headers()
        .get(LOCATION)
        .expect("redirect without Location")
        .to_str()
        .unwrap();
    Url::parse(raw).unwrap()
}

/// Query parameters of the Location header
pub fn location_query(response: &Response) -> HashMap<String, String> {
    location(response).query_pairs().into_owned().collect()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn json_parts(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let text = body_text(response).await;
    let value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    (status, value)
}

/// Decode a JWT payload without verifying it
pub fn jwt_payload(token: &str) -> Value {
    let payload = token.split('.').nth(1).expect("not a JWT");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

/// Decode a JWT header without verifying it
pub fn jwt_header(token: &str) -> Value {
    let header = token.split('.').next().expect("not a JWT");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap()
}
