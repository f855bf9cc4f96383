// ABOUTME: Criterion benchmarks for the token endpoint's hot paths
// ABOUTME: Measures PKCE verification, opaque token minting, and RS256 sign/verify latency
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Criterion benchmarks for token issuance.
//!
//! Covers the per-request cryptographic work of `/token` and `/userinfo`: PKCE checks,
//! refresh token generation and hashing, and JWT signing and verification.

#![allow(
    clippy::missing_docs_in_private_items,
    clippy::unwrap_used,
    missing_docs
)]

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Map;
use tokio::runtime::Runtime;
use tollgate::auth::AccessTokenClaims;
use tollgate::clock::SystemClock;
use tollgate::crypto::{generate_opaque_token, hash_opaque_token, pkce};
use tollgate::key_management::{KeyManager, KeyManagerConfig};
use tollgate::storage::{MemoryStore, SharedStore};
use tollgate_core::models::PkceMethod;
use uuid::Uuid;

const ISSUER: &str = "https://auth.example.com";

fn bench_pkce(c: &mut Criterion) {
    let mut group = c.benchmark_group("pkce");
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = pkce::s256_challenge(verifier);

    group.bench_function("s256_verify", |b| {
        b.iter(|| {
            black_box(pkce::verify(
                black_box(verifier),
                black_box(&challenge),
                PkceMethod::S256,
            ))
        });
    });
    group.bench_function("well_formed", |b| {
        b.iter(|| black_box(pkce::is_well_formed(black_box(verifier))));
    });
    group.finish();
}

fn bench_opaque_tokens(c: &mut Criterion) {
    let mut group = c.benchmark_group("opaque_token");
    group.bench_function("generate", |b| {
        b.iter(|| black_box(generate_opaque_token().unwrap()));
    });

    let token = generate_opaque_token().unwrap();
    group.bench_function("hash", |b| {
        b.iter(|| black_box(hash_opaque_token(black_box(&token))));
    });
    group.finish();
}

fn sample_claims(extra_claims: usize) -> AccessTokenClaims {
    let now = Utc::now().timestamp();
    let mut extra = Map::new();
    for i in 0..extra_claims {
        extra.insert(format!("claim_{i}"), format!("value_{i}").into());
    }
    AccessTokenClaims {
        iss: ISSUER.to_owned(),
        sub: "user-123".to_owned(),
        aud: "web-app".to_owned(),
        exp: now + 900,
        iat: now,
        nbf: now,
        jti: Uuid::new_v4().to_string(),
        scope: "openid profile orders:read".to_owned(),
        client_id: "web-app".to_owned(),
        fid: Uuid::new_v4(),
        extra,
    }
}

fn bench_jwt(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let keys = rt.block_on(async {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let keys = KeyManager::new(store, Arc::new(SystemClock), KeyManagerConfig::new(ISSUER));
        let kid = keys.generate_pending().await.unwrap();
        keys.promote(&kid).await.unwrap();
        keys
    });

    let mut group = c.benchmark_group("jwt");
    for extra_claims in [0, 8] {
        let claims = sample_claims(extra_claims);
        group.bench_with_input(
            BenchmarkId::new("sign", extra_claims),
            &claims,
            |b, claims| {
                b.to_async(&rt)
                    .iter(|| async { black_box(keys.sign(claims).await.unwrap()) });
            },
        );

        let token = rt.block_on(keys.sign(&claims)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("verify", extra_claims),
            &token,
            |b, token| {
                b.to_async(&rt).iter(|| async {
                    black_box(
                        keys.verify::<AccessTokenClaims>(token, Some("web-app"))
                            .await
                            .unwrap(),
                    )
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pkce, bench_opaque_tokens, bench_jwt);
criterion_main!(benches);
