// ABOUTME: Security event notifications for refresh reuse, code replay, revocation, and consent
// ABOUTME: SecurityEventSink is the delivery seam; the default sink writes structured tracing events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::logging::AppLogger;

/// Security-relevant occurrence in the token engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// An already-rotated refresh token was presented again
    RefreshTokenReuse {
        /// Family that was revoked in response
        family_id: Uuid,
        /// Client the family belongs to
        client_id: String,
        /// End user the family belongs to
        user_id: String,
    },
    /// A consumed authorization code was presented again
    AuthorizationCodeReplay {
        /// Client the code was issued to
        client_id: String,
        /// End user the code was issued for
        user_id: String,
        /// Families revoked in response
        revoked_families: Vec<Uuid>,
    },
    /// A family was revoked
    FamilyRevoked {
        /// Revoked family
        family_id: Uuid,
        /// Reason recorded on the family
        reason: String,
    },
    /// A user granted consent
    ConsentGranted {
        /// End user
        user_id: String,
        /// Client
        client_id: String,
        /// Granted scope (space-delimited)
        scope: String,
    },
    /// A user withdrew consent
    ConsentRevoked {
        /// End user
        user_id: String,
        /// Client
        client_id: String,
    },
}

impl SecurityEvent {
    /// Stable event name
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RefreshTokenReuse { .. } => "refresh_token_reuse",
            Self::AuthorizationCodeReplay { .. } => "authorization_code_replay",
            Self::FamilyRevoked { .. } => "family_revoked",
            Self::ConsentGranted { .. } => "consent_granted",
            Self::ConsentRevoked { .. } => "consent_revoked",
        }
    }

    /// Severity used in logs
    #[must_use]
    pub const fn severity(&self) -> &'static str {
        match self {
            Self::RefreshTokenReuse { .. } | Self::AuthorizationCodeReplay { .. } => "high",
            Self::FamilyRevoked { .. } => "medium",
            Self::ConsentGranted { .. } | Self::ConsentRevoked { .. } => "info",
        }
    }

    fn client_id(&self) -> Option<&str> {
        match self {
            Self::RefreshTokenReuse { client_id, .. }
            | Self::AuthorizationCodeReplay { client_id, .. }
            | Self::ConsentGranted { client_id, .. }
            | Self::ConsentRevoked { client_id, .. } => Some(client_id),
            Self::FamilyRevoked { .. } => None,
        }
    }

    fn user_id(&self) -> Option<&str> {
        match self {
            Self::RefreshTokenReuse { user_id, .. }
            | Self::AuthorizationCodeReplay { user_id, .. }
            | Self::ConsentGranted { user_id, .. }
            | Self::ConsentRevoked { user_id, .. } => Some(user_id),
            Self::FamilyRevoked { .. } => None,
        }
    }
}

/// Destination for security events
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    /// Deliver one event. Delivery failures must not affect the request that raised it.
    async fn emit(&self, event: SecurityEvent);
}

/// Shared sink handle
pub type SharedEventSink = Arc<dyn SecurityEventSink>;

/// Sink writing events to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSecurityEventSink;

#[async_trait]
impl SecurityEventSink for LogSecurityEventSink {
    async fn emit(&self, event: SecurityEvent) {
        let details = serde_json::to_value(&event).unwrap_or_else(|_| json!({}));
        AppLogger::log_security_event(
            event.event_type(),
            event.severity(),
            event.client_id(),
            event.user_id(),
            &details,
        );
    }
}
