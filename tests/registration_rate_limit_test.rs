// ABOUTME: Dynamic client registration (RFC 7591) and endpoint rate limiting tests
// ABOUTME: Registered clients are exercised through a full authorization code flow
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{Request, StatusCode};
use common::{test_config, Pkce, TestServer, TestServerOptions, USER};
use serde_json::json;

#[tokio::test]
async fn test_register_public_client_and_complete_flow() {
    let server = TestServer::new().await;
    let (status, body) = server
        .post_json(
            "/oauth2/register",
            &json!({
                "redirect_uris": ["http://localhost:8765/callback"],
                "client_name": "CLI tool",
                "token_endpoint_auth_method": "none",
                "scope": "openid profile"
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body.get("client_secret").is_none());
    assert_eq!(body["token_endpoint_auth_method"], "none");
    assert_eq!(body["scope"], "openid profile");
    let client_id = body["client_id"].as_str().unwrap().to_owned();
    assert!(client_id.starts_with("client_"));

    // Dynamic clients are never trusted, so consent is required
    let pkce = Pkce::new();
    let params = pkce.authorize_params(&client_id, "http://localhost:8765/callback", "openid");
    let response = server.authorize(&params, Some(USER)).await;
    let location = common::location(&response);
    assert!(location.as_str().starts_with("https://login.example.com/consent"));

    server.grant_consent(USER, &client_id, "openid").await;
    let code = server.authorize_code(&params, USER).await;
    let (status, body) = server
        .post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "http://localhost:8765/callback"),
                ("code_verifier", &pkce.verifier),
                ("client_id", &client_id),
            ],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn test_register_confidential_client_returns_secret_once() {
    let server = TestServer::new().await;
    let (status, body) = server
        .post_json(
            "/oauth2/register",
            &json!({
                "redirect_uris": ["https://partner.example.com/cb"],
                "grant_types": ["authorization_code", "refresh_token", "client_credentials"],
                "scope": "openid reports:read"
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["token_endpoint_auth_method"], "client_secret_basic");
    assert_eq!(body["client_secret_expires_at"], 0);
    let client_id = body["client_id"].as_str().unwrap();
    let secret = body["client_secret"].as_str().unwrap();

    let (status, body) = server
        .post_form(
            "/token",
            &[("grant_type", "client_credentials"), ("scope", "reports:read")],
            Some((client_id, secret)),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let stored = server
        .resources
        .store
        .get_client(client_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.trusted);
    assert_ne!(stored.client_secret_hash.as_deref(), Some(secret));
}

#[tokio::test]
async fn test_register_rejects_bad_metadata() {
    let server = TestServer::new().await;
    let cases = [
        json!({ "redirect_uris": [] }),
        json!({ "redirect_uris": ["http://evil.example.com/cb"] }),
        json!({ "redirect_uris": ["https://app.example.com/cb#frag"] }),
        json!({ "redirect_uris": ["https://*.example.com/cb"] }),
        json!({ "redirect_uris": ["https://app.example.com/cb"], "grant_types": ["password"] }),
        json!({ "redirect_uris": ["https://app.example.com/cb"], "response_types": ["token"] }),
        json!({
            "redirect_uris": ["https://app.example.com/cb"],
            "token_endpoint_auth_method": "none",
            "grant_types": ["client_credentials"]
        }),
    ];
    for case in cases {
        let (status, body) = server.post_json("/oauth2/register", &case, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert_eq!(body["error"], "invalid_request", "{case}");
    }

    let response = server
        .send(
            Request::post("/oauth2/register")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_rejects_scopes_the_server_does_not_offer() {
    let server = TestServer::new().await;
    let (status, body) = server
        .post_json(
            "/oauth2/register",
            &json!({
                "redirect_uris": ["https://partner.example.com/cb"],
                "scope": "openid admin:all billing.write"
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "invalid_scope");

    let (_, discovery) = server.get("/.well-known/openid-configuration", None).await;
    let supported = discovery["scopes_supported"].as_array().unwrap();
    assert!(supported.iter().all(|s| s != "admin:all"));
    assert!(supported.iter().any(|s| s == "reports:read"));

    // No scope requested grants the whole supported set
    let (status, body) = server
        .post_json(
            "/oauth2/register",
            &json!({ "redirect_uris": ["https://partner.example.com/cb"] }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(
        body["scope"],
        "email offline_access openid orders:read profile reports:read"
    );
}

#[tokio::test]
async fn test_disabled_dynamic_client_cannot_authenticate() {
    let server = TestServer::new().await;
    let (_, body) = server
        .post_json(
            "/oauth2/register",
            &json!({
                "redirect_uris": ["https://partner.example.com/cb"],
                "grant_types": ["client_credentials"],
                "scope": "reports:read"
            }),
            None,
        )
        .await;
    let client_id = body["client_id"].as_str().unwrap();
    let secret = body["client_secret"].as_str().unwrap();

    assert!(server
        .resources
        .store
        .set_client_disabled(client_id, true)
        .await
        .unwrap());
    let (status, body) = server
        .post_form(
            "/token",
            &[("grant_type", "client_credentials")],
            Some((client_id, secret)),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_token_endpoint_rate_limit() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.token_per_window = 2;
    let server = TestServer::build(TestServerOptions {
        config,
        ..TestServerOptions::default()
    })
    .await;

    let request = || {
        Request::post("/token")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("grant_type=client_credentials"))
            .unwrap()
    };
    for _ in 0..2 {
        let response = server.send(request()).await;
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let response = server.send(request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let (_, body) = common::json_parts(response).await;
    assert_eq!(body["error"], "temporarily_unavailable");

    // Other endpoints keep their own budget
    let (status, _) = server.get("/.well-known/jwks.json", None).await;
    assert_eq!(status, StatusCode::OK);
    let response = server.authorize(&[("client_id", "web-app")], None).await;
    assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_registration_rate_limit() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.register_per_window = 1;
    let server = TestServer::build(TestServerOptions {
        config,
        ..TestServerOptions::default()
    })
    .await;

    let body = json!({
        "redirect_uris": ["https://partner.example.com/cb"],
        "token_endpoint_auth_method": "none"
    });
    let (status, _) = server.post_json("/oauth2/register", &body, None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = server.post_json("/oauth2/register", &body, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}
