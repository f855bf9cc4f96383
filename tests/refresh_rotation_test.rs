// ABOUTME: Refresh token rotation tests including reuse detection and concurrent redemption
// ABOUTME: Concurrency cases run against both the memory and SQLite backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Duration;
use common::{
    json_parts, jwt_payload, Pkce, TestServer, USER, WEB_CLIENT, WEB_REDIRECT, WEB_SECRET,
};
use tempfile::TempDir;
use tokio::task::JoinSet;
use tollgate::server::run_maintenance;
use tollgate::storage::{self, SharedStore};
use tower::ServiceExt;

const RACERS: usize = 8;

async fn sqlite_store(dir: &TempDir) -> SharedStore {
    let url = format!("sqlite:{}", dir.path().join("tollgate.db").display());
    storage::connect(&url, StdDuration::from_secs(5)).await.unwrap()
}

fn basic_header() -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{WEB_CLIENT}:{WEB_SECRET}"))
    )
}

/// Fire the same token request from several tasks at once and collect the statuses
async fn race(router: &Router, form: String) -> Vec<StatusCode> {
    let mut set = JoinSet::new();
    for _ in 0..RACERS {
        let router = router.clone();
        let form = form.clone();
        set.spawn(async move {
            let request = Request::post("/token")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(AUTHORIZATION, basic_header())
                .body(Body::from(form))
                .unwrap();
            router.oneshot(request).await.unwrap().status()
        });
    }
    let mut statuses = Vec::with_capacity(RACERS);
    while let Some(status) = set.join_next().await {
        statuses.push(status.unwrap());
    }
    statuses
}

fn successes(statuses: &[StatusCode]) -> usize {
    statuses.iter().filter(|s| **s == StatusCode::OK).count()
}

#[tokio::test]
async fn test_refresh_rotates_and_keeps_the_family() {
    let server = TestServer::new().await;
    let first = server.web_tokens("openid orders:read").await;
    let first_refresh = first["refresh_token"].as_str().unwrap();

    server.clock.advance(Duration::minutes(5));
    let (status, second) = server.refresh_web(first_refresh).await;
    assert_eq!(status, StatusCode::OK, "{second}");

    let second_refresh = second["refresh_token"].as_str().unwrap();
    assert_ne!(second_refresh, first_refresh);
    assert_eq!(second["scope"], "openid orders:read");
    assert!(second["id_token"].is_string());

    let first_claims = jwt_payload(first["access_token"].as_str().unwrap());
    let second_claims = jwt_payload(second["access_token"].as_str().unwrap());
    assert_eq!(first_claims["fid"], second_claims["fid"]);
    assert_eq!(second_claims["iat"], first_claims["iat"].as_i64().unwrap() + 300);

    let (status, _) = server.refresh_web(second_refresh).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reuse_of_rotated_token_revokes_the_family() {
    let server = TestServer::new().await;
    let first = server.web_tokens("openid").await;
    let stolen = first["refresh_token"].as_str().unwrap().to_owned();

    let (_, rotated) = server.refresh_web(&stolen).await;
    let current = rotated["refresh_token"].as_str().unwrap();

    let (status, body) = server.refresh_web(&stolen).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(server.events.count("refresh_token_reuse"), 1);
    assert_eq!(server.events.count("family_revoked"), 1);

    // The legitimate holder's newer token dies with the family
    let (status, body) = server.refresh_web(current).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");

    let (status, _) = server
        .get("/userinfo", rotated["access_token"].as_str())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_can_narrow_but_not_widen_scope() {
    let server = TestServer::new().await;
    let tokens = server.web_tokens("openid orders:read orders:write").await;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, body) = server
        .post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh),
                ("scope", "openid orders:write email"),
            ],
            Some((WEB_CLIENT, WEB_SECRET)),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");

    // The rejected request did not burn the token
    let (status, body) = server
        .post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh),
                ("scope", "orders:read"),
            ],
            Some((WEB_CLIENT, WEB_SECRET)),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["scope"], "orders:read");
    assert!(body.get("id_token").is_none());
    assert_eq!(server.events.count("refresh_token_reuse"), 0);
}

#[tokio::test]
async fn test_expired_refresh_token_is_rejected() {
    let server = TestServer::new().await;
    let tokens = server.web_tokens("openid").await;

    server.clock.advance(Duration::days(31));
    let (status, body) = server
        .refresh_web(tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_expires_exactly_at_its_lifetime() {
    let server = TestServer::new().await;
    let ttl = server.resources.config.lifetimes.refresh_token();

    let tokens = server.web_tokens("openid").await;
    server.clock.advance(ttl);
    let (status, body) = server
        .refresh_web(tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");

    let tokens = server.web_tokens("openid").await;
    server.clock.advance(ttl - Duration::seconds(1));
    let (status, body) = server
        .refresh_web(tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn test_unknown_refresh_token_is_invalid_grant() {
    let server = TestServer::new().await;
    let (status, body) = server.refresh_web("not-a-real-token").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(server.events.count("refresh_token_reuse"), 0);
}

#[tokio::test]
async fn test_refresh_token_is_bound_to_its_client() {
    let server = TestServer::new().await;
    let tokens = server.web_tokens("openid").await;

    let (status, body) = server
        .post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
                ("client_id", common::SPA_CLIENT),
            ],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

async fn assert_single_refresh_winner(server: &TestServer) {
    let tokens = server.web_tokens("openid").await;
    let refresh = tokens["refresh_token"].as_str().unwrap();
    let form = serde_urlencoded::to_string([
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
    ])
    .unwrap();

    let statuses = race(&server.router, form).await;
    assert_eq!(successes(&statuses), 1, "statuses: {statuses:?}");

    // Losing racers presented a consumed token, which revokes the family
    assert!(server.events.count("refresh_token_reuse") >= 1);
    let (status, _) = server
        .get("/userinfo", tokens["access_token"].as_str())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

async fn assert_single_code_winner(server: &TestServer) {
    server.grant_consent(USER, WEB_CLIENT, "openid").await;
    let pkce = Pkce::new();
    let code = server
        .authorize_code(&pkce.authorize_params(WEB_CLIENT, WEB_REDIRECT, "openid"), USER)
        .await;
    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", WEB_REDIRECT),
        ("code_verifier", pkce.verifier.as_str()),
    ])
    .unwrap();

    let statuses = race(&server.router, form).await;
    assert!(successes(&statuses) <= 1, "statuses: {statuses:?}");
    assert!(statuses
        .iter()
        .all(|s| *s == StatusCode::OK || *s == StatusCode::BAD_REQUEST));
    assert!(server.events.count("authorization_code_replay") >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner_memory() {
    let server = TestServer::new().await;
    assert_single_refresh_winner(&server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner_sqlite() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::with_store(sqlite_store(&dir).await).await;
    assert_single_refresh_winner(&server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_code_redemption_has_one_winner_memory() {
    let server = TestServer::new().await;
    assert_single_code_winner(&server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_code_redemption_has_one_winner_sqlite() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::with_store(sqlite_store(&dir).await).await;
    assert_single_code_winner(&server).await;
}

#[tokio::test]
async fn test_rotation_survives_restart_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let refresh = {
        let server = TestServer::with_store(sqlite_store(&dir).await).await;
        let tokens = server.web_tokens("openid").await;
        tokens["refresh_token"].as_str().unwrap().to_owned()
    };

    let store = sqlite_store(&dir).await;
    let server = common::TestServer::build(common::TestServerOptions {
        store: Some(store),
        with_active_key: false,
        ..common::TestServerOptions::default()
    })
    .await;
    let (status, body) = server.refresh_web(&refresh).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = json_parts(
        server
            .send(
                Request::get("/.well-known/jwks.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keys"][0]["kid"], "kid-1");
}

#[tokio::test]
async fn test_maintenance_purges_expired_tokens_then_their_family_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::with_store(sqlite_store(&dir).await).await;
    let tokens = server.web_tokens("openid").await;
    let family_id = jwt_payload(tokens["access_token"].as_str().unwrap())["fid"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    server.clock.advance(Duration::days(1));
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.purged_families, 0);
    assert!(server
        .resources
        .store
        .get_family(family_id)
        .await
        .unwrap()
        .is_some());

    server.clock.advance(Duration::days(30));
    let report = run_maintenance(&server.resources).await.unwrap();
    assert_eq!(report.purged_refresh_tokens, 1);
    assert_eq!(report.purged_families, 1);
    assert!(server
        .resources
        .store
        .get_family(family_id)
        .await
        .unwrap()
        .is_none());
}
