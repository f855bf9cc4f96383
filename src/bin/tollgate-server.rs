// ABOUTME: Tollgate authorization server binary
// ABOUTME: Loads configuration, bootstraps signing keys, and serves the OAuth2/OIDC endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! # Tollgate Server Binary
//!
//! Serves the authorization, token, JWKS, and discovery endpoints. Static clients are
//! reloaded from `TOLLGATE_CLIENTS_FILE` on SIGHUP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tollgate::config::ServerConfig;
use tollgate::logging;
use tollgate::resources::{ServerResources, ServerResourcesBuilder};
use tollgate::server::run_server;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tollgate-server")]
#[command(about = "Tollgate - OAuth 2.0 / OpenID Connect authorization server")]
/// Command line overrides for environment configuration
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL (`sqlite:path` or `memory://`)
    #[arg(long)]
    database_url: Option<String>,

    /// Override static clients file
    #[arg(long)]
    clients_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    if let Some(clients_file) = args.clients_file {
        config.clients_file = Some(clients_file);
    }
    config.validate()?;

    let port = config.http_port;
    info!(
        issuer = %config.issuer,
        database_url = %config.database_url,
        "Starting Tollgate"
    );

    let resources = ServerResourcesBuilder::new(config).build_arc().await?;
    if let Some(kid) = resources.keys.bootstrap_if_empty().await? {
        info!(kid = %kid, "Signing key store was empty; generated the first key");
    }

    spawn_client_reloader(resources.clone());

    if let Err(e) = run_server(resources, port).await {
        error!("Server error: {e}");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
fn spawn_client_reloader(resources: Arc<ServerResources>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to listen for SIGHUP, static clients will not reload: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match resources.reload_static_clients() {
                Ok(count) => info!(count, "Reloaded static clients"),
                Err(e) => error!("Static client reload failed, keeping previous registry: {e}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_client_reloader(_resources: Arc<ServerResources>) {}
