// ABOUTME: End-user profile used as the claims source for the userinfo endpoint
// ABOUTME: Users are authenticated upstream; Tollgate only reads their profile claims
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// End-user profile claims
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Subject identifier
    pub user_id: String,
    /// Email address
    pub email: Option<String>,
    /// Whether the email address was verified
    pub email_verified: bool,
    /// Full name
    pub name: Option<String>,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Profile picture URL
    pub picture: Option<String>,
    /// Last profile change
    pub updated_at: Option<DateTime<Utc>>,
}
