// ABOUTME: Out-of-band administration for signing keys, clients, and consent grants
// ABOUTME: Operates directly on the configured store; running servers pick key changes up on reload
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Usage:
//! ```bash
//! # Generate a pending key; it is published in the JWKS but does not sign yet
//! tollgate-admin keys generate
//!
//! # Make it the active signing key; the previous active key starts retiring
//! tollgate-admin keys promote key_0f3c...
//!
//! # Hash a confidential client secret for the static clients file
//! tollgate-admin clients hash-secret 's3cr3t'
//!
//! # Withdraw a user's consent for a client
//! tollgate-admin consents revoke --user alice --client web-app
//!
//! # Kill every token in a family (the `fid` claim of an access token)
//! tollgate-admin families revoke 6f1c2d3e-...
//! ```

use std::io;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tollgate::config::ServerConfig;
use tollgate::oauth2_server::client_registration::hash_client_secret;
use tollgate::oauth2_server::revocation::reasons;
use tollgate::resources::{ServerResources, ServerResourcesBuilder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "tollgate-admin",
    about = "Tollgate administration",
    long_about = "Manage Tollgate signing keys, clients, consent grants, and token families directly in the store."
)]
struct AdminArgs {
    #[command(subcommand)]
    command: AdminCommand,

    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Signing key lifecycle
    #[command(subcommand)]
    Keys(KeysCommand),

    /// Client management
    #[command(subcommand)]
    Clients(ClientsCommand),

    /// Consent grants
    #[command(subcommand)]
    Consents(ConsentsCommand),

    /// Refresh token families
    #[command(subcommand)]
    Families(FamiliesCommand),
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a new pending key
    Generate {
        /// Promote the new key immediately
        #[arg(long)]
        promote: bool,
    },
    /// Promote a pending key to active
    Promote {
        /// Key id
        kid: String,
    },
    /// List keys and their lifecycle state
    List,
    /// Expire retiring keys whose overlap has elapsed
    Expire,
}

#[derive(Subcommand)]
enum ClientsCommand {
    /// Print the Argon2 hash of a client secret
    HashSecret {
        /// Plaintext secret
        secret: String,
    },
    /// Disable a dynamically registered client
    Disable {
        /// Client id
        client_id: String,
    },
    /// Re-enable a dynamically registered client
    Enable {
        /// Client id
        client_id: String,
    },
}

#[derive(Subcommand)]
enum ConsentsCommand {
    /// List a user's consent grants
    List {
        /// User id
        #[arg(long)]
        user: String,
    },
    /// Withdraw a user's consent for a client
    Revoke {
        /// User id
        #[arg(long)]
        user: String,
        /// Client id
        #[arg(long)]
        client: String,
    },
}

#[derive(Subcommand)]
enum FamiliesCommand {
    /// Revoke a family and every token issued from it
    Revoke {
        /// Family id
        family_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AdminArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tollgate=info")),
        )
        .with_writer(io::stderr)
        .init();

    if let AdminCommand::Clients(ClientsCommand::HashSecret { secret }) = &args.command {
        println!("{}", hash_client_secret(secret)?);
        return Ok(());
    }

    let mut config = ServerConfig::from_env()?;
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    let resources = ServerResourcesBuilder::new(config).build().await?;

    match args.command {
        AdminCommand::Keys(command) => run_keys(&resources, command).await,
        AdminCommand::Clients(command) => run_clients(&resources, command).await,
        AdminCommand::Consents(command) => run_consents(&resources, command).await,
        AdminCommand::Families(FamiliesCommand::Revoke { family_id }) => {
            if resources
                .revocation
                .revoke_family(family_id, reasons::ADMIN)
                .await?
            {
                info!(family_id = %family_id, "Family revoked");
            } else {
                warn!(family_id = %family_id, "Family unknown or already revoked");
            }
            Ok(())
        }
    }
}

async fn run_keys(resources: &ServerResources, command: KeysCommand) -> Result<()> {
    match command {
        KeysCommand::Generate { promote } => {
            let kid = resources.keys.generate_pending().await?;
            println!("{kid}");
            if promote {
                resources.keys.promote(&kid).await?;
                info!(kid = %kid, "Promoted");
            }
        }
        KeysCommand::Promote { kid } => {
            resources.keys.promote(&kid).await?;
            info!(kid = %kid, "Promoted");
        }
        KeysCommand::List => {
            let keys = resources.keys.list().await;
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        KeysCommand::Expire => {
            let expired = resources.keys.expire_retired().await?;
            if expired.is_empty() {
                info!("No retiring keys past their overlap");
            }
            for kid in expired {
                println!("{kid}");
            }
        }
    }
    Ok(())
}

async fn run_clients(resources: &ServerResources, command: ClientsCommand) -> Result<()> {
    let (client_id, disabled) = match command {
        ClientsCommand::Disable { client_id } => (client_id, true),
        ClientsCommand::Enable { client_id } => (client_id, false),
        ClientsCommand::HashSecret { .. } => return Ok(()),
    };
    if !resources
        .store
        .set_client_disabled(&client_id, disabled)
        .await?
    {
        return Err(anyhow!(
            "No dynamically registered client {client_id}; static clients are managed in the clients file"
        ));
    }
    info!(client_id = %client_id, disabled, "Client updated");
    Ok(())
}

async fn run_consents(resources: &ServerResources, command: ConsentsCommand) -> Result<()> {
    match command {
        ConsentsCommand::List { user } => {
            let consents = resources.consent.list_consents(&user).await?;
            println!("{}", serde_json::to_string_pretty(&consents)?);
        }
        ConsentsCommand::Revoke { user, client } => {
            if resources.consent.revoke_consent(&user, &client).await? {
                info!(user_id = %user, client_id = %client, "Consent revoked");
            } else {
                warn!(user_id = %user, client_id = %client, "No consent on record");
            }
        }
    }
    Ok(())
}
