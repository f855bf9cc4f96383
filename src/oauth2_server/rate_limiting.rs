// ABOUTME: Fixed-window request limits for the authorize, token, and registration endpoints
// ABOUTME: Tracks (endpoint, client IP) pairs in a sharded DashMap and reports X-RateLimit values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitConfig;

/// Endpoints that carry a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedEndpoint {
    /// `GET /authorize`
    Authorize,
    /// `POST /token`
    Token,
    /// `POST /oauth2/register`
    Register,
}

impl RateLimitedEndpoint {
    /// Label used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Token => "token",
            Self::Register => "register",
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Serialize)]
pub struct OAuth2RateLimitStatus {
    /// Whether this request must be rejected
    pub is_limited: bool,
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix time at which the window resets
    pub reset_at: i64,
    /// Seconds until the window resets, set only when limited
    pub retry_after_seconds: Option<u64>,
}

/// `OAuth2` rate limiter
#[derive(Clone)]
pub struct OAuth2RateLimiter {
    /// (endpoint, IP) -> (`request_count`, `window_start`)
    state: Arc<DashMap<(RateLimitedEndpoint, IpAddr), (u32, Instant)>>,
    config: RateLimitConfig,
}

impl OAuth2RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Whether limits are enforced at all
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    const fn limit_for(&self, endpoint: RateLimitedEndpoint) -> u32 {
        match endpoint {
            RateLimitedEndpoint::Authorize => self.config.authorize_per_window,
            RateLimitedEndpoint::Token => self.config.token_per_window,
            RateLimitedEndpoint::Register => self.config.register_per_window,
        }
    }

    /// Count a request and report whether it is within the limit
    #[must_use]
    pub fn check_rate_limit(
        &self,
        endpoint: RateLimitedEndpoint,
        client_ip: IpAddr,
    ) -> OAuth2RateLimitStatus {
        let limit = self.limit_for(endpoint);
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);

        let mut entry = self.state.entry((endpoint, client_ip)).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= window {
            *count = 0;
            *window_start = now;
        }

        let is_limited = *count >= limit;
        if !is_limited {
            *count += 1;
        }
        let remaining = limit.saturating_sub(*count);
        let elapsed = now.duration_since(*window_start);
        drop(entry);

        if self.state.len() > self.config.cleanup_threshold {
            self.cleanup_old_entries(now, window);
        }

        let until_reset = window.saturating_sub(elapsed);
        #[allow(clippy::cast_possible_wrap)]
        // Unix seconds fit in i64
        let reset_at = (SystemTime::now() + until_reset)
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64;

        OAuth2RateLimitStatus {
            is_limited,
            limit,
            remaining,
            reset_at,
            retry_after_seconds: is_limited.then(|| until_reset.as_secs().max(1)),
        }
    }

    fn cleanup_old_entries(&self, now: Instant, window: Duration) {
        self.state
            .retain(|_key, (_count, start)| now.duration_since(*start) < window);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn limiter(token_per_window: u32) -> OAuth2RateLimiter {
        OAuth2RateLimiter::new(RateLimitConfig {
            token_per_window,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn test_limit_is_enforced_per_window() {
        let limiter = limiter(2);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let first = limiter.check_rate_limit(RateLimitedEndpoint::Token, ip);
        assert!(!first.is_limited);
        assert_eq!(first.remaining, 1);
        assert!(!limiter.check_rate_limit(RateLimitedEndpoint::Token, ip).is_limited);

        let third = limiter.check_rate_limit(RateLimitedEndpoint::Token, ip);
        assert!(third.is_limited);
        assert_eq!(third.remaining, 0);
        assert!(third.retry_after_seconds.is_some());
    }

    #[test]
    fn test_endpoints_and_addresses_are_tracked_separately() {
        let limiter = limiter(1);
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(!limiter.check_rate_limit(RateLimitedEndpoint::Token, a).is_limited);
        assert!(limiter.check_rate_limit(RateLimitedEndpoint::Token, a).is_limited);
        assert!(!limiter.check_rate_limit(RateLimitedEndpoint::Token, b).is_limited);
        assert!(!limiter
            .check_rate_limit(RateLimitedEndpoint::Register, a)
            .is_limited);
    }
}
