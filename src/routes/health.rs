// ABOUTME: Health check route handlers for service monitoring and status endpoints
// ABOUTME: Liveness always answers; readiness requires an active signing key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Health check routes for service monitoring

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tollgate_core::constants::service::{SERVICE_NAME, SERVICE_VERSION};

use crate::resources::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .route("/ready", get(Self::handle_ready))
            .with_state(resources)
    }

    async fn handle_health(State(resources): State<Arc<ServerResources>>) -> Json<serde_json::Value> {
        Json(json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "version": SERVICE_VERSION,
            "timestamp": resources.clock.now().to_rfc3339()
        }))
    }

    /// Ready once tokens can be signed
    async fn handle_ready(State(resources): State<Arc<ServerResources>>) -> Response {
        let active_kid = resources.keys.active_kid().await;
        let status = if active_kid.is_some() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (
            status,
            Json(json!({
                "status": if active_kid.is_some() { "ready" } else { "no_active_signing_key" },
                "active_kid": active_kid,
                "timestamp": resources.clock.now().to_rfc3339()
            })),
        )
            .into_response()
    }
}
