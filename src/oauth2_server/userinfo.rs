// ABOUTME: OIDC userinfo claims filtered by the scope carried in the access token
// ABOUTME: `sub` is always returned; profile and email claims only when their scope was granted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use serde::{Deserialize, Serialize};
use tollgate_core::constants::scopes::{EMAIL, OPENID, PROFILE};
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::{ScopeSet, UserRecord};

use crate::auth::AccessTokenClaims;
use crate::storage::SharedStore;

/// Userinfo response (OIDC Core §5.3.2)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfoResponse {
    /// Subject
    pub sub: String,
    /// Full name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Given name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Picture URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Last profile update, Unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Email address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the email was verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl UserInfoResponse {
    /// Claims of `user` visible under `scope`
    #[must_use]
    pub fn from_user(user: &UserRecord, scope: &ScopeSet) -> Self {
        let mut response = Self {
            sub: user.user_id.clone(),
            ..Self::default()
        };
        if scope.contains(PROFILE) {
            response.name.clone_from(&user.name);
            response.given_name.clone_from(&user.given_name);
            response.family_name.clone_from(&user.family_name);
            response.picture.clone_from(&user.picture);
            response.updated_at = user.updated_at.map(|t| t.timestamp());
        }
        if scope.contains(EMAIL) && user.email.is_some() {
            response.email.clone_from(&user.email);
            response.email_verified = Some(user.email_verified);
        }
        response
    }
}

/// Resolve the userinfo response for an authenticated bearer token.
///
/// Users without a stored profile still get `sub`.
///
/// # Errors
///
/// Returns `InvalidToken` when the token lacks `openid` (reported as `insufficient_scope` text)
/// or a server error when the store lookup fails
pub async fn userinfo(
    store: &SharedStore,
    claims: &AccessTokenClaims,
) -> Result<UserInfoResponse, OAuth2Error> {
    let scope = claims.scope_set();
    if !scope.contains(OPENID) {
        return Err(OAuth2Error::InvalidToken(
            "insufficient_scope: the openid scope is required".to_owned(),
        ));
    }
    let user = store
        .get_user(&claims.sub)
        .await?
        .unwrap_or_else(|| UserRecord {
            user_id: claims.sub.clone(),
            ..UserRecord::default()
        });
    Ok(UserInfoResponse::from_user(&user, &scope))
}
