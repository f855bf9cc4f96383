// ABOUTME: Environment configuration for the authorization server listener, storage, and token policy
// ABOUTME: Parses TOLLGATE_* variables with typed defaults and reports the offending variable on error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Environment-based configuration management

use std::env;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tollgate_core::constants::keys::{RETIRING_OVERLAP_DAYS, RSA_KEY_SIZE};
use tollgate_core::constants::{scopes, ttl};
use tollgate_core::models::ScopeSet;
use tracing::info;
use url::Url;

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default end-user identity header set by the upstream authenticator
pub const DEFAULT_USER_HEADER: &str = "x-authenticated-user";

/// Lifetimes of codes, tokens, and pending consent, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLifetimes {
    /// Authorization code
    pub auth_code_secs: i64,
    /// Access token
    pub access_token_secs: i64,
    /// Refresh token
    pub refresh_token_secs: i64,
    /// ID token
    pub id_token_secs: i64,
    /// Pending consent request
    pub pending_consent_secs: i64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            auth_code_secs: ttl::AUTH_CODE_SECS,
            access_token_secs: ttl::ACCESS_TOKEN_SECS,
            refresh_token_secs: ttl::REFRESH_TOKEN_SECS,
            id_token_secs: ttl::ID_TOKEN_SECS,
            pending_consent_secs: ttl::PENDING_CONSENT_SECS,
        }
    }
}

impl TokenLifetimes {
    /// Authorization code lifetime
    #[must_use]
    pub const fn auth_code(&self) -> Duration {
        Duration::seconds(self.auth_code_secs)
    }

    /// Access token lifetime
    #[must_use]
    pub const fn access_token(&self) -> Duration {
        Duration::seconds(self.access_token_secs)
    }

    /// Refresh token lifetime
    #[must_use]
    pub const fn refresh_token(&self) -> Duration {
        Duration::seconds(self.refresh_token_secs)
    }

    /// ID token lifetime
    #[must_use]
    pub const fn id_token(&self) -> Duration {
        Duration::seconds(self.id_token_secs)
    }

    /// Pending consent lifetime
    #[must_use]
    pub const fn pending_consent(&self) -> Duration {
        Duration::seconds(self.pending_consent_secs)
    }
}

/// Per-IP limits for the OAuth 2.0 endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether limits are enforced
    pub enabled: bool,
    /// Requests per window at `/authorize`
    pub authorize_per_window: u32,
    /// Requests per window at `/token`
    pub token_per_window: u32,
    /// Requests per window at `/oauth2/register`
    pub register_per_window: u32,
    /// Window length
    pub window_secs: u64,
    /// Tracked IPs before stale entries are swept
    pub cleanup_threshold: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            authorize_per_window: 60,
            token_per_window: 30,
            register_per_window: 10,
            window_secs: 60,
            cleanup_threshold: 10_000,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Issuer identifier (`iss`), also the base URL of every endpoint
    pub issuer: String,
    /// `sqlite:...` or `memory://`
    pub database_url: String,
    /// Static client registry (YAML)
    pub clients_file: Option<PathBuf>,
    /// Login page for unauthenticated users
    pub login_url: String,
    /// Consent page
    pub consent_url: String,
    /// Header carrying the authenticated end user
    pub user_header: String,
    /// Lifetimes
    pub lifetimes: TokenLifetimes,
    /// RSA modulus size for new keys
    pub rsa_key_size: usize,
    /// Days a replaced signing key keeps verifying
    pub key_overlap_days: i64,
    /// Per-call store deadline
    pub store_timeout_ms: u64,
    /// Whole-request deadline at the HTTP layer
    pub request_timeout_secs: u64,
    /// Whether confidential clients must also use PKCE
    pub require_pkce_for_confidential: bool,
    /// Consent expiry; `None` keeps consent until revoked
    pub consent_ttl_days: Option<i64>,
    /// Maintenance task period
    pub maintenance_interval_secs: u64,
    /// Endpoint rate limits
    pub rate_limit: RateLimitConfig,
    /// Scopes advertised in discovery; also the ceiling for dynamically registered clients
    pub scopes_supported: ScopeSet,
}

impl ServerConfig {
    /// Defaults for `issuer`: in-memory store, no static clients
    #[must_use]
    pub fn for_issuer(issuer: &str) -> Self {
        let issuer = issuer.trim_end_matches('/').to_owned();
        Self {
            http_port: DEFAULT_HTTP_PORT,
            login_url: format!("{issuer}/login"),
            consent_url: format!("{issuer}/consent"),
            issuer,
            database_url: "memory://".to_owned(),
            clients_file: None,
            user_header: DEFAULT_USER_HEADER.to_owned(),
            lifetimes: TokenLifetimes::default(),
            rsa_key_size: RSA_KEY_SIZE,
            key_overlap_days: RETIRING_OVERLAP_DAYS,
            store_timeout_ms: 5_000,
            request_timeout_secs: 30,
            require_pkce_for_confidential: false,
            consent_ttl_days: None,
            maintenance_interval_secs: 60,
            rate_limit: RateLimitConfig::default(),
            scopes_supported: ScopeSet::from_tokens([
                scopes::OPENID,
                scopes::PROFILE,
                scopes::EMAIL,
                scopes::OFFLINE_ACCESS,
            ]),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable that failed to parse, or if the result is invalid
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let http_port = parse_env("TOLLGATE_HTTP_PORT", DEFAULT_HTTP_PORT)?;
        let issuer = env::var("TOLLGATE_ISSUER")
            .unwrap_or_else(|_| format!("http://localhost:{http_port}"));
        let defaults = Self::for_issuer(&issuer);

        let lifetimes = TokenLifetimes {
            auth_code_secs: parse_env(
                "TOLLGATE_AUTH_CODE_TTL_SECS",
                defaults.lifetimes.auth_code_secs,
            )?,
            access_token_secs: parse_env(
                "TOLLGATE_ACCESS_TOKEN_TTL_SECS",
                defaults.lifetimes.access_token_secs,
            )?,
            refresh_token_secs: parse_env(
                "TOLLGATE_REFRESH_TOKEN_TTL_SECS",
                defaults.lifetimes.refresh_token_secs,
            )?,
            id_token_secs: parse_env(
                "TOLLGATE_ID_TOKEN_TTL_SECS",
                defaults.lifetimes.id_token_secs,
            )?,
            pending_consent_secs: parse_env(
                "TOLLGATE_PENDING_CONSENT_TTL_SECS",
                defaults.lifetimes.pending_consent_secs,
            )?,
        };

        let rate_limit = RateLimitConfig {
            enabled: parse_env("TOLLGATE_RATE_LIMIT_ENABLED", defaults.rate_limit.enabled)?,
            authorize_per_window: parse_env(
                "TOLLGATE_RATE_LIMIT_AUTHORIZE",
                defaults.rate_limit.authorize_per_window,
            )?,
            token_per_window: parse_env(
                "TOLLGATE_RATE_LIMIT_TOKEN",
                defaults.rate_limit.token_per_window,
            )?,
            register_per_window: parse_env(
                "TOLLGATE_RATE_LIMIT_REGISTER",
                defaults.rate_limit.register_per_window,
            )?,
            window_secs: parse_env(
                "TOLLGATE_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit.window_secs,
            )?,
            cleanup_threshold: defaults.rate_limit.cleanup_threshold,
        };

        let config = Self {
            http_port,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/tollgate.db".to_owned()),
            clients_file: env::var("TOLLGATE_CLIENTS_FILE").ok().map(PathBuf::from),
            login_url: env::var("TOLLGATE_LOGIN_URL").unwrap_or(defaults.login_url),
            consent_url: env::var("TOLLGATE_CONSENT_URL").unwrap_or(defaults.consent_url),
            user_header: env::var("TOLLGATE_USER_HEADER")
                .unwrap_or(defaults.user_header)
                .to_ascii_lowercase(),
            lifetimes,
            rsa_key_size: parse_env("TOLLGATE_RSA_KEY_SIZE", defaults.rsa_key_size)?,
            key_overlap_days: parse_env("TOLLGATE_KEY_OVERLAP_DAYS", defaults.key_overlap_days)?,
            store_timeout_ms: parse_env("TOLLGATE_STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            request_timeout_secs: parse_env(
                "TOLLGATE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            require_pkce_for_confidential: parse_env(
                "TOLLGATE_REQUIRE_PKCE_CONFIDENTIAL",
                defaults.require_pkce_for_confidential,
            )?,
            consent_ttl_days: parse_optional_env("TOLLGATE_CONSENT_TTL_DAYS")?,
            maintenance_interval_secs: parse_env(
                "TOLLGATE_MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval_secs,
            )?,
            rate_limit,
            scopes_supported: parse_env("TOLLGATE_SCOPES_SUPPORTED", defaults.scopes_supported)?,
            issuer: defaults.issuer,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.issuer)
            .with_context(|| format!("TOLLGATE_ISSUER is not a URL: {}", self.issuer))?;
        Url::parse(&self.login_url).context("TOLLGATE_LOGIN_URL is not a URL")?;
        Url::parse(&self.consent_url).context("TOLLGATE_CONSENT_URL is not a URL")?;

        let l = &self.lifetimes;
        if l.auth_code_secs <= 0 || l.auth_code_secs > ttl::AUTH_CODE_SECS {
            bail!(
                "authorization code lifetime must be between 1 and {} seconds",
                ttl::AUTH_CODE_SECS
            );
        }
        if l.access_token_secs <= 0
            || l.refresh_token_secs <= 0
            || l.id_token_secs <= 0
            || l.pending_consent_secs <= 0
        {
            bail!("token lifetimes must be positive");
        }
        if self.rsa_key_size < 2048 {
            bail!("TOLLGATE_RSA_KEY_SIZE must be at least 2048");
        }
        if self.key_overlap_days <= 0 {
            bail!("TOLLGATE_KEY_OVERLAP_DAYS must be positive");
        }
        if self.user_header.is_empty() {
            bail!("TOLLGATE_USER_HEADER must not be empty");
        }
        if !self.scopes_supported.contains(scopes::OPENID) {
            bail!("TOLLGATE_SCOPES_SUPPORTED must include openid");
        }
        Ok(())
    }

    /// Per-call store deadline
    #[must_use]
    pub const fn store_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.store_timeout_ms)
    }

    /// Retiring-key overlap
    #[must_use]
    pub const fn key_overlap(&self) -> Duration {
        Duration::days(self.key_overlap_days)
    }

    /// Consent expiry, if configured
    #[must_use]
    pub fn consent_ttl(&self) -> Option<Duration> {
        self.consent_ttl_days.map(Duration::days)
    }

    /// Absolute URL of an endpoint path under the issuer
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.issuer)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::for_issuer(&format!("http://localhost:{DEFAULT_HTTP_PORT}"))
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {key} value: {raw}")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lifetimes.auth_code_secs, 600);
        assert_eq!(config.endpoint("/token"), "http://localhost:8080/token");
    }

    #[test]
    fn test_code_lifetime_is_capped() {
        let mut config = ServerConfig::default();
        config.lifetimes.auth_code_secs = 601;
        assert!(config.validate().is_err());
    }
}
