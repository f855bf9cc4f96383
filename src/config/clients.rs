// ABOUTME: Static client registry loaded from a YAML file at startup and on SIGHUP
// ABOUTME: Only statically configured clients can be marked trusted (consent skipped)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tollgate_core::errors::{AppError, AppResult};
use tollgate_core::models::{ClientType, OAuth2Client, ScopeSet};
use tracing::info;

/// One statically configured client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticClientEntry {
    /// Client identifier
    pub client_id: String,
    /// Argon2 PHC hash of the secret (precomputed, e.g. with `tollgate-admin clients hash-secret`)
    #[serde(default)]
    pub client_secret_hash: Option<String>,
    /// Exact redirect URIs
    pub redirect_uris: Vec<String>,
    /// Space-delimited scopes the client may request
    #[serde(default)]
    pub allowed_scopes: String,
    /// `confidential` or `public`
    pub client_type: ClientType,
    /// Skip the consent screen
    #[serde(default)]
    pub trusted: bool,
    /// Reject the client everywhere
    #[serde(default)]
    pub disabled: bool,
    /// Display name
    #[serde(default)]
    pub client_name: Option<String>,
    /// Allowed grant types; defaults to code + refresh
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
}

impl StaticClientEntry {
    fn into_client(self, loaded_at: DateTime<Utc>) -> AppResult<OAuth2Client> {
        if self.client_id.trim().is_empty() {
            return Err(AppError::config("static client with empty client_id"));
        }
        if self.redirect_uris.is_empty() {
            return Err(AppError::config(format!(
                "static client {} has no redirect_uris",
                self.client_id
            )));
        }
        match (self.client_type, &self.client_secret_hash) {
            (ClientType::Confidential, None) => {
                return Err(AppError::config(format!(
                    "confidential client {} needs client_secret_hash",
                    self.client_id
                )))
            }
            (ClientType::Public, Some(_)) => {
                return Err(AppError::config(format!(
                    "public client {} must not have a secret",
                    self.client_id
                )))
            }
            _ => {}
        }

        Ok(OAuth2Client {
            client_id: self.client_id,
            client_secret_hash: self.client_secret_hash,
            redirect_uris: self.redirect_uris,
            allowed_scopes: ScopeSet::parse(&self.allowed_scopes),
            client_type: self.client_type,
            trusted: self.trusted,
            disabled: self.disabled,
            client_name: self.client_name,
            grant_types: self
                .grant_types
                .unwrap_or_else(OAuth2Client::default_grant_types),
            created_at: loaded_at,
        })
    }
}

/// Static client registry file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticClientsConfig {
    /// Configured clients
    #[serde(default)]
    pub clients: Vec<StaticClientEntry>,
}

impl StaticClientsConfig {
    /// Read and parse a YAML registry
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read clients file {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&raw)?;
        info!(
            path = %path.display(),
            clients = config.clients.len(),
            "Loaded static client registry"
        );
        Ok(config)
    }

    /// Parse a YAML registry
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed
    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| AppError::config(format!("invalid clients file: {e}")))
    }

    /// Convert every entry into a client, rejecting duplicates and incomplete entries
    ///
    /// # Errors
    ///
    /// Returns an error for the first invalid or duplicate entry
    pub fn into_clients(self, loaded_at: DateTime<Utc>) -> AppResult<Vec<OAuth2Client>> {
        let mut seen = HashSet::new();
        self.clients
            .into_iter()
            .map(|entry| {
                if !seen.insert(entry.client_id.clone()) {
                    return Err(AppError::config(format!(
                        "duplicate static client {}",
                        entry.client_id
                    )));
                }
                entry.into_client(loaded_at)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
clients:
  - client_id: web
    client_secret_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"
    redirect_uris: ["https://web.example/cb"]
    allowed_scopes: "openid profile email"
    client_type: confidential
    trusted: true
  - client_id: spa
    redirect_uris: ["https://spa.example/cb"]
    allowed_scopes: "openid"
    client_type: public
"#;

    #[test]
    fn test_parse_registry() {
        let clients = StaticClientsConfig::from_yaml_str(YAML)
            .unwrap()
            .into_clients(Utc::now())
            .unwrap();
        assert_eq!(clients.len(), 2);
        assert!(clients[0].trusted);
        assert!(clients[1].is_public());
        assert!(clients[1].allows_grant("refresh_token"));
    }

    #[test]
    fn test_public_client_with_secret_is_rejected() {
        let yaml = r#"
clients:
  - client_id: spa
    client_secret_hash: "x"
    redirect_uris: ["https://spa.example/cb"]
    client_type: public
"#;
        let config = StaticClientsConfig::from_yaml_str(yaml).unwrap();
        assert!(config.into_clients(Utc::now()).is_err());
    }
}
