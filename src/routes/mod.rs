// ABOUTME: Route module organization for Tollgate HTTP endpoints
// ABOUTME: Groups the OAuth 2.0 / OIDC endpoints and the health checks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! Route module for Tollgate
//!
//! Each domain module contains only route definitions and thin handler functions that
//! delegate to the authorization server.

/// Health check and readiness routes
pub mod health;
/// OAuth 2.0 / OIDC routes
pub mod oauth2;

/// Health route handlers
pub use health::HealthRoutes;
/// OAuth 2.0 route handlers
pub use oauth2::OAuth2Routes;
