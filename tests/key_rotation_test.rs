// ABOUTME: Signing key lifecycle tests through the JWKS, discovery, health, and token endpoints
// ABOUTME: Covers the retiring overlap window, expiry via maintenance, and issuance without an active key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::body::Body;
use axum::http::header::CACHE_CONTROL;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use common::{
    json_parts, jwt_header, test_config, Pkce, TestServer, TestServerOptions, ISSUER,
    SERVICE_CLIENT, SERVICE_SECRET, USER, WEB_CLIENT, WEB_REDIRECT,
};
use serde_json::{json, Value};
use tollgate::server::{run_maintenance, MaintenanceReport};
use tollgate_core::models::KeyState;

async fn jwks_kids(server: &TestServer) -> Vec<String> {
    let (status, body) = server.get("/.well-known/jwks.json", None).await;
    assert_eq!(status, StatusCode::OK);
    body["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["kid"].as_str().unwrap().to_owned())
        .collect()
}

/// A server whose access tokens outlive the retiring overlap
async fn long_lived_server() -> TestServer {
    let mut config = test_config();
    config.lifetimes.access_token_secs = 30 * 24 * 60 * 60;
    TestServer::build(TestServerOptions {
        config,
        ..TestServerOptions::default()
    })
    .await
}

#[tokio::test]
async fn test_jwks_publishes_rsa_keys_with_cache_headers() {
    let server = TestServer::new().await;
    let response = server
        .send(
            Request::get("/.well-known/jwks.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=300");

    let (_, body) = json_parts(response).await;
    let key = &body["keys"][0];
    assert_eq!(key["kid"], "kid-1");
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["use"], "sig");
    assert_eq!(key["alg"], "RS256");
    assert_eq!(key["e"], "AQAB");
    assert!(key.get("d").is_none());
}

#[tokio::test]
async fn test_pending_key_is_published_but_does_not_sign() {
    let server = TestServer::new().await;
    server.add_key("kid-2", 1).await;

    let kids = jwks_kids(&server).await;
    assert!(kids.contains(&"kid-1".to_owned()));
    assert!(kids.contains(&"kid-2".to_owned()));

    let tokens = server.web_tokens("openid").await;
    assert_eq!(
        jwt_header(tokens["access_token"].as_str().unwrap())["kid"],
        "kid-1"
    );
}

#[tokio::test]
async fn test_retiring_key_verifies_until_overlap_ends() {
    let server = long_lived_server().await;
    let old_token = server.web_tokens("openid").await["access_token"]
        .as_str()
        .unwrap()
        .to_owned();

    server.add_key("kid-2", 1).await;
    server.resources.keys.promote("kid-2").await.unwrap();

    let states: Vec<(String, KeyState)> = server
        .resources
        .keys
        .list()
        .await
        .into_iter()
        .map(|k| (k.kid, k.state))
        .collect();
    assert!(states.contains(&("kid-1".to_owned(), KeyState::Retiring)));
    assert!(states.contains(&("kid-2".to_owned(), KeyState::Active)));

    let new_token = server.web_tokens("openid").await["access_token"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(jwt_header(&new_token)["kid"], "kid-2");

    server.clock.advance(Duration::days(6));
    let (status, body) = server.get("/userinfo", Some(&old_token)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(jwks_kids(&server).await.len(), 2);

    server.clock.advance(Duration::days(2));
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.expired_keys, vec!["kid-1".to_owned()]);
    assert_eq!(jwks_kids(&server).await, vec!["kid-2".to_owned()]);

    let (status, _) = server.get("/userinfo", Some(&old_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = server.get("/userinfo", Some(&new_token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_promoting_a_non_pending_key_fails() {
    let server = TestServer::new().await;
    assert!(server.resources.keys.promote("kid-1").await.is_err());
    assert!(server.resources.keys.promote("missing").await.is_err());
    assert_eq!(
        server.resources.keys.active_kid().await.as_deref(),
        Some("kid-1")
    );
}

#[tokio::test]
async fn test_no_active_key_refuses_issuance() {
    let server = TestServer::build(TestServerOptions {
        with_active_key: false,
        ..TestServerOptions::default()
    })
    .await;
    server.add_key("kid-pending", 0).await;

    let (status, body) = server.get("/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "no_active_signing_key");
    let (status, _) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);

    server.grant_consent(USER, WEB_CLIENT, "openid").await;
    let pkce = Pkce::new();
    let code = server
        .authorize_code(&pkce.authorize_params(WEB_CLIENT, WEB_REDIRECT, "openid"), USER)
        .await;
    let (status, body) = server.exchange_web_code(&code, &pkce.verifier).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "server_error");

    server.resources.keys.promote("kid-pending").await.unwrap();
    let (status, body) = server.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_kid"], "kid-pending");
}

#[tokio::test]
async fn test_discovery_documents() {
    let server = TestServer::new().await;
    for path in [
        "/.well-known/openid-configuration",
        "/.well-known/oauth-authorization-server",
    ] {
        let (status, body) = server.get(path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["issuer"], ISSUER);
        assert_eq!(body["authorization_endpoint"], format!("{ISSUER}/authorize"));
        assert_eq!(body["token_endpoint"], format!("{ISSUER}/token"));
        assert_eq!(body["jwks_uri"], format!("{ISSUER}/.well-known/jwks.json"));
        assert_eq!(body["response_types_supported"], json!(["code"]));
        assert_eq!(
            body["id_token_signing_alg_values_supported"],
            json!(["RS256"])
        );
        let methods = body["code_challenge_methods_supported"].as_array().unwrap();
        assert!(methods.contains(&Value::from("S256")));
    }
}

#[tokio::test]
async fn test_maintenance_purges_expired_records() {
    let server = TestServer::new().await;
    let tokens = server.web_tokens("openid").await;

    // One unredeemed code and one parked consent request
    server.grant_consent(USER, WEB_CLIENT, "openid").await;
    let pkce = Pkce::new();
    server
        .authorize_code(&pkce.authorize_params(WEB_CLIENT, WEB_REDIRECT, "openid"), USER)
        .await;
    let wider = pkce.authorize_params(WEB_CLIENT, WEB_REDIRECT, "openid email");
    let response = server.authorize(&wider, Some(USER)).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report, MaintenanceReport::default());

    server.clock.advance(Duration::days(31));
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.purged_codes, 2);
    assert_eq!(report.purged_pending, 1);
    assert_eq!(report.purged_refresh_tokens, 1);
    assert_eq!(report.purged_families, 1);

    let (status, _) = server
        .refresh_web(tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_maintenance_purges_families_without_refresh_tokens() {
    let server = TestServer::new().await;
    let (status, body) = server
        .post_form(
            "/token",
            &[("grant_type", "client_credentials"), ("scope", "reports:read")],
            Some((SERVICE_CLIENT, SERVICE_SECRET)),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // The family outlives the access token it signed
    let access_ttl = server.resources.config.lifetimes.access_token();
    server.clock.advance(access_ttl);
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.purged_families, 0);

    server.clock.advance(Duration::seconds(61));
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.purged_families, 1);
}
