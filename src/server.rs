// ABOUTME: HTTP server assembly: router, tower middleware stack, graceful shutdown, maintenance loop
// ABOUTME: Binds the OAuth2 and health routes and periodically expires keys and purges stale rows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

#[cfg(not(unix))]
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::Router;
use chrono::Duration;
use tokio::net::TcpListener;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::task::JoinHandle;
use tokio::time;
use tollgate_core::constants::ttl::JWT_LEEWAY_SECS;
use tollgate_core::errors::{AppError, AppResult};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Span};

use crate::resources::ServerResources;
use crate::routes::{HealthRoutes, OAuth2Routes};

/// Request bodies above this size are rejected with 413
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Rows removed by one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Kids moved from retiring to expired
    pub expired_keys: Vec<String>,
    /// Expired authorization codes deleted
    pub purged_codes: u64,
    /// Expired pending consent requests deleted
    pub purged_pending: u64,
    /// Expired refresh tokens deleted
    pub purged_refresh_tokens: u64,
    /// Token families with no refresh tokens left deleted
    pub purged_families: u64,
}

/// Build the full application router with the middleware stack applied
#[must_use]
pub fn build_router(resources: &Arc<ServerResources>) -> Router {
    let timeout = StdDuration::from_secs(resources.config.request_timeout_secs);

    Router::new()
        .merge(OAuth2Routes::routes(resources.clone()))
        .merge(HealthRoutes::routes(resources.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(TimeoutLayer::new(timeout)),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Serve on `port` until ctrl-c or SIGTERM, running maintenance in the background
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails
pub async fn run_server(resources: Arc<ServerResources>, port: u16) -> AppResult<()> {
    let app = build_router(&resources);
    let maintenance = spawn_maintenance(resources.clone());

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind port {port}: {e}")))?;
    info!(port, issuer = %resources.config.issuer, "Tollgate listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    maintenance.abort();
    served.map_err(|e| AppError::internal(format!("HTTP server failed: {e}")))?;
    info!("Gracefully shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Run the maintenance pass every `maintenance_interval_secs`
pub fn spawn_maintenance(resources: Arc<ServerResources>) -> JoinHandle<()> {
    let period = StdDuration::from_secs(resources.config.maintenance_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = run_maintenance(&resources).await {
                error!("Maintenance pass failed: {e}");
            }
        }
    })
}

/// Pick up key changes made by other processes, expire retired keys, and delete stale rows
///
/// # Errors
///
/// Returns an error if any store operation fails
pub async fn run_maintenance(resources: &ServerResources) -> AppResult<MaintenanceReport> {
    resources.keys.reload().await?;
    let expired_keys = resources.keys.expire_retired().await?;
    let now = resources.clock.now();
    // Access tokens carry `fid`, so a family outlives the longest access token it signed
    let family_cutoff = now
        - resources.config.lifetimes.access_token()
        - Duration::seconds(i64::try_from(JWT_LEEWAY_SECS).unwrap_or_default());
    let purged_refresh_tokens = resources.store.purge_expired_refresh_tokens(now).await?;
    let report = MaintenanceReport {
        expired_keys,
        purged_codes: resources.codes.purge_expired().await?,
        purged_pending: resources
            .store
            .purge_expired_pending_authorizations(now)
            .await?,
        purged_refresh_tokens,
        purged_families: resources.store.purge_stale_families(family_cutoff).await?,
    };
    if report != MaintenanceReport::default() {
        info!(
            expired_keys = report.expired_keys.len(),
            purged_codes = report.purged_codes,
            purged_pending = report.purged_pending,
            purged_refresh_tokens = report.purged_refresh_tokens,
            purged_families = report.purged_families,
            "Maintenance pass complete"
        );
    }
    Ok(report)
}
