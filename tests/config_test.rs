// ABOUTME: Environment configuration and static client registry tests
// ABOUTME: Environment cases run serially since they mutate process-wide variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::env;
use std::fs;

use axum::http::StatusCode;
use common::{test_config, TestServer, TestServerOptions, ISSUER};
use serial_test::serial;
use tempfile::TempDir;
use tollgate::config::ServerConfig;
use tollgate::oauth2_server::client_registration::hash_client_secret;
use tollgate::resources::ServerResourcesBuilder;

const TOLLGATE_VARS: &[&str] = &[
    "TOLLGATE_HTTP_PORT",
    "TOLLGATE_ISSUER",
    "DATABASE_URL",
    "TOLLGATE_CLIENTS_FILE",
    "TOLLGATE_LOGIN_URL",
    "TOLLGATE_USER_HEADER",
    "TOLLGATE_AUTH_CODE_TTL_SECS",
    "TOLLGATE_ACCESS_TOKEN_TTL_SECS",
    "TOLLGATE_RATE_LIMIT_ENABLED",
    "TOLLGATE_RATE_LIMIT_TOKEN",
    "TOLLGATE_RSA_KEY_SIZE",
    "TOLLGATE_CONSENT_TTL_DAYS",
    "TOLLGATE_REQUIRE_PKCE_CONFIDENTIAL",
    "TOLLGATE_SCOPES_SUPPORTED",
];

fn clear_env() {
    for var in TOLLGATE_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_from_empty_environment() {
    clear_env();
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.issuer, "http://localhost:8080");
    assert_eq!(config.login_url, "http://localhost:8080/login");
    assert_eq!(config.lifetimes.auth_code_secs, 600);
    assert_eq!(config.lifetimes.access_token_secs, 900);
    assert_eq!(config.key_overlap_days, 7);
    assert!(config.rate_limit.enabled);
    assert!(config.consent_ttl_days.is_none());
    assert!(!config.require_pkce_for_confidential);
    assert_eq!(
        config.scopes_supported.to_string(),
        "email offline_access openid profile"
    );
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    env::set_var("TOLLGATE_HTTP_PORT", "9443");
    env::set_var("TOLLGATE_ISSUER", "https://id.example.com/");
    env::set_var("DATABASE_URL", "memory://");
    env::set_var("TOLLGATE_USER_HEADER", "X-Remote-User");
    env::set_var("TOLLGATE_ACCESS_TOKEN_TTL_SECS", "300");
    env::set_var("TOLLGATE_RATE_LIMIT_ENABLED", "false");
    env::set_var("TOLLGATE_RATE_LIMIT_TOKEN", "5");
    env::set_var("TOLLGATE_CONSENT_TTL_DAYS", "90");
    env::set_var("TOLLGATE_REQUIRE_PKCE_CONFIDENTIAL", "true");
    env::set_var("TOLLGATE_SCOPES_SUPPORTED", "openid orders:read");

    let config = ServerConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.http_port, 9443);
    assert_eq!(config.issuer, "https://id.example.com");
    assert_eq!(config.endpoint("/token"), "https://id.example.com/token");
    assert_eq!(config.database_url, "memory://");
    assert_eq!(config.user_header, "x-remote-user");
    assert_eq!(config.lifetimes.access_token_secs, 300);
    assert!(!config.rate_limit.enabled);
    assert_eq!(config.rate_limit.token_per_window, 5);
    assert_eq!(config.consent_ttl_days, Some(90));
    assert!(config.require_pkce_for_confidential);
    assert!(config.scopes_supported.contains("orders:read"));
}

#[test]
#[serial]
fn test_invalid_environment_is_rejected() {
    let cases = [
        ("TOLLGATE_HTTP_PORT", "eighty"),
        ("TOLLGATE_ISSUER", "not a url"),
        ("TOLLGATE_AUTH_CODE_TTL_SECS", "3600"),
        ("TOLLGATE_RSA_KEY_SIZE", "1024"),
        ("TOLLGATE_CONSENT_TTL_DAYS", "soon"),
        ("TOLLGATE_SCOPES_SUPPORTED", "profile email"),
    ];
    for (var, value) in cases {
        clear_env();
        env::set_var(var, value);
        let result = ServerConfig::from_env();
        clear_env();
        assert!(result.is_err(), "{var}={value} should be rejected");
    }
}

#[test]
fn test_validate_catches_programmatic_mistakes() {
    let mut config = ServerConfig::for_issuer(ISSUER);
    assert!(config.validate().is_ok());
    config.lifetimes.refresh_token_secs = 0;
    assert!(config.validate().is_err());

    let mut config = ServerConfig::for_issuer(ISSUER);
    config.key_overlap_days = 0;
    assert!(config.validate().is_err());
}

fn clients_yaml(web_hash: &str, web_trusted: bool) -> String {
    format!(
        r#"
clients:
  - client_id: yaml-web
    client_secret_hash: "{web_hash}"
    redirect_uris: ["https://yaml.example.com/cb"]
    allowed_scopes: "openid profile"
    client_type: confidential
    trusted: {web_trusted}
  - client_id: yaml-spa
    redirect_uris: ["https://yaml-spa.example.com/cb"]
    allowed_scopes: "openid"
    client_type: public
"#
    )
}

#[tokio::test]
async fn test_static_clients_load_and_reload_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clients.yaml");
    let hash = hash_client_secret("yaml-secret").unwrap();
    fs::write(&path, clients_yaml(&hash, false)).unwrap();

    let mut config = test_config();
    config.clients_file = Some(path.clone());
    let server = TestServer::build(TestServerOptions {
        config,
        clients: Vec::new(),
        ..TestServerOptions::default()
    })
    .await;
    // An explicit client list overrides the file, so reload to read it
    assert_eq!(server.resources.reload_static_clients().unwrap(), 2);

    let client = server
        .resources
        .clients
        .authenticate("yaml-web", Some("yaml-secret"))
        .await
        .unwrap();
    assert!(!client.trusted);
    assert!(server
        .resources
        .clients
        .authenticate("yaml-spa", None)
        .await
        .is_ok());

    fs::write(&path, clients_yaml(&hash, true)).unwrap();
    assert_eq!(server.resources.reload_static_clients().unwrap(), 2);
    let client = server
        .resources
        .clients
        .get_client("yaml-web")
        .await
        .unwrap()
        .unwrap();
    assert!(client.trusted);

    // A broken file leaves the previous registry in place
    fs::write(&path, "clients: [ { client_id: yaml-web } ]").unwrap();
    assert!(server.resources.reload_static_clients().is_err());
    assert!(server
        .resources
        .clients
        .get_client("yaml-spa")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_duplicate_static_clients_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clients.yaml");
    let yaml = r#"
clients:
  - client_id: twin
    redirect_uris: ["https://a.example.com/cb"]
    client_type: public
  - client_id: twin
    redirect_uris: ["https://b.example.com/cb"]
    client_type: public
"#;
    fs::write(&path, yaml).unwrap();

    let server = TestServer::new().await;
    let mut config = (*server.resources.config).clone();
    config.clients_file = Some(path);
    let result = ServerResourcesBuilder::new(config).build().await;
    assert!(result.is_err());

    let (status, _) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
