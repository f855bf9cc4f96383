// ABOUTME: Ordered extension hooks run at authorization, token issuance, and access-token claim building
// ABOUTME: Each hook is a pure function of its context; the first error aborts the pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tollgate_core::errors::OAuth2Error;
use tollgate_core::models::ScopeSet;
use uuid::Uuid;

use super::validator::ValidatedAuthorization;

/// A single hook
pub type Hook<C> = Arc<dyn Fn(C) -> Result<C, OAuth2Error> + Send + Sync>;

/// Ordered list of hooks over context `C`
pub struct HookPipeline<C> {
    hooks: Vec<Hook<C>>,
}

impl<C> HookPipeline<C> {
    /// Empty pipeline (identity)
    #[must_use]
    pub const fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook
    #[must_use]
    pub fn with<F>(mut self, hook: F) -> Self
    where
        F: Fn(C) -> Result<C, OAuth2Error> + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Number of hooks
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether the pipeline is the identity
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order, stopping at the first error
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing hook
    pub fn run(&self, context: C) -> Result<C, OAuth2Error> {
        self.hooks.iter().try_fold(context, |ctx, hook| hook(ctx))
    }
}

impl<C> Default for HookPipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for HookPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<C> fmt::Debug for HookPipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPipeline")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Context seen by token hooks before anything is signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContext {
    /// `authorization_code`, `refresh_token`, or `client_credentials`
    pub grant_type: String,
    /// Client receiving the tokens
    pub client_id: String,
    /// Subject
    pub user_id: String,
    /// Scope about to be granted; hooks may narrow it
    pub scope: ScopeSet,
    /// Family the tokens belong to
    pub family_id: Uuid,
}

/// The three hook points
#[derive(Debug, Clone, Default)]
pub struct OAuth2Hooks {
    /// Runs on a validated authorization request before consent
    pub authorize: HookPipeline<ValidatedAuthorization>,
    /// Runs before tokens are signed
    pub token: HookPipeline<TokenContext>,
    /// Produces custom access-token claims
    pub access_token_claims: HookPipeline<Map<String, Value>>,
}
