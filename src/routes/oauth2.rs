// ABOUTME: OAuth 2.0 / OIDC route handlers: authorize, consent, token, userinfo, JWKS, discovery
// ABOUTME: Also serves RFC 7591 registration, RFC 7009 revocation, and RFC 7662 introspection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! OAuth 2.0 routes
//!
//! Handlers are thin: they extract credentials and parameters, apply the endpoint rate
//! limit, and delegate to [`OAuth2AuthorizationServer`](crate::oauth2_server::OAuth2AuthorizationServer).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequest, Path, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, PRAGMA, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::headers::authorization::{Basic, Bearer};
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tollgate_core::errors::OAuth2Error;
use tracing::{debug, warn};

use crate::oauth2_server::models::{
    AuthorizeRequest, ClientCredentials, ClientRegistrationRequest, ConsentSubmission,
    IntrospectRequest, RevokeRequest, TokenRequest,
};
use crate::oauth2_server::{OAuth2RateLimitStatus, RateLimitedEndpoint};
use crate::resources::ServerResources;

/// JWKS responses may be cached for five minutes
const JWKS_CACHE_CONTROL: &str = "public, max-age=300";

type BasicAuth = Option<TypedHeader<Authorization<Basic>>>;
type Peer = Option<ConnectInfo<SocketAddr>>;

/// OAuth 2.0 routes implementation
pub struct OAuth2Routes;

impl OAuth2Routes {
    /// Create all OAuth 2.0 / OIDC routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/authorize", get(Self::handle_authorize))
            .route("/oauth2/authorize", get(Self::handle_authorize))
            .route("/oauth2/consent", post(Self::handle_consent_submit))
            .route("/oauth2/consent/:consent_id", get(Self::handle_consent_prompt))
            .route("/token", post(Self::handle_token))
            .route("/oauth2/token", post(Self::handle_token))
            .route(
                "/userinfo",
                get(Self::handle_userinfo).post(Self::handle_userinfo),
            )
            .route("/.well-known/jwks.json", get(Self::handle_jwks))
            .route(
                "/.well-known/openid-configuration",
                get(Self::handle_discovery),
            )
            .route(
                "/.well-known/oauth-authorization-server",
                get(Self::handle_discovery),
            )
            .route("/oauth2/register", post(Self::handle_register))
            .route("/oauth2/revoke", post(Self::handle_revoke))
            .route("/oauth2/introspect", post(Self::handle_introspect))
            .with_state(resources)
    }

    /// End user asserted by the upstream authenticator
    fn end_user<'a>(resources: &ServerResources, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(resources.config.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn peer_ip(peer: Peer) -> IpAddr {
        peer.map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| addr.ip())
    }

    /// Apply the endpoint limit, returning the 429 response when exceeded
    fn rate_limit(
        resources: &ServerResources,
        endpoint: RateLimitedEndpoint,
        peer: Peer,
    ) -> Result<(), Response> {
        if !resources.rate_limiter.is_enabled() {
            return Ok(());
        }
        let ip = Self::peer_ip(peer);
        let status = resources.rate_limiter.check_rate_limit(endpoint, ip);
        if status.is_limited {
            warn!(endpoint = endpoint.as_str(), ip = %ip, "Rate limit exceeded");
            return Err(rate_limited_response(&status));
        }
        Ok(())
    }

    /// Merge HTTP Basic and form credentials (RFC 6749 §2.3.1). Using both is an error.
    fn client_credentials(
        basic: BasicAuth,
        form_client_id: Option<&str>,
        form_client_secret: Option<&str>,
    ) -> Result<ClientCredentials, OAuth2Error> {
        if let Some(TypedHeader(Authorization(basic))) = basic {
            if form_client_secret.is_some() {
                return Err(OAuth2Error::InvalidRequest(
                    "use only one client authentication method".to_owned(),
                ));
            }
            let client_id = urlencoding::decode(basic.username())
                .map_err(|_| OAuth2Error::InvalidClient("malformed client id".to_owned()))?
                .into_owned();
            let client_secret = urlencoding::decode(basic.password())
                .map_err(|_| OAuth2Error::InvalidClient("malformed client secret".to_owned()))?
                .into_owned();
            if form_client_id.is_some_and(|id| id != client_id) {
                return Err(OAuth2Error::InvalidClient(
                    "client_id does not match the authenticated client".to_owned(),
                ));
            }
            return Ok(ClientCredentials {
                client_id,
                client_secret: Some(client_secret),
            });
        }
        let client_id = form_client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OAuth2Error::InvalidClient("client authentication required".to_owned()))?;
        Ok(ClientCredentials {
            client_id: client_id.to_owned(),
            client_secret: form_client_secret.map(str::to_owned),
        })
    }

    /// Handle `GET /authorize`
    async fn handle_authorize(
        State(resources): State<Arc<ServerResources>>,
        peer: Peer,
        headers: HeaderMap,
        uri: Uri,
        query: Result<Query<AuthorizeRequest>, QueryRejection>,
    ) -> Response {
        if let Err(response) = Self::rate_limit(&resources, RateLimitedEndpoint::Authorize, peer) {
            return response;
        }
        let Ok(Query(request)) = query else {
            return error_page(&OAuth2Error::InvalidRequest(
                "malformed authorization request".to_owned(),
            ));
        };

        let return_to = resources
            .config
            .endpoint(uri.path_and_query().map_or("/authorize", |pq| pq.as_str()));
        let user = Self::end_user(&resources, &headers);

        match resources
            .oauth2
            .authorize(&request, user, &return_to)
            .await
        {
            Ok(outcome) => found(outcome.location()),
            Err(error) => {
                debug!(client_id = %request.client_id, "Authorization request rejected: {error}");
                error_page(&error)
            }
        }
    }

    /// Handle `GET /oauth2/consent/:consent_id`
    async fn handle_consent_prompt(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(consent_id): Path<String>,
    ) -> Result<Response, OAuth2Error> {
        let user = Self::end_user(&resources, &headers).ok_or(OAuth2Error::LoginRequired)?;
        let prompt = resources.oauth2.consent_prompt(&consent_id, user).await?;
        Ok(no_store(Json(prompt).into_response()))
    }

    /// Handle `POST /oauth2/consent` (form or JSON body)
    async fn handle_consent_submit(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        request: Request,
    ) -> Result<Response, OAuth2Error> {
        let user = Self::end_user(&resources, &headers).ok_or(OAuth2Error::LoginRequired)?;
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let malformed = |e: String| OAuth2Error::InvalidRequest(format!("malformed consent: {e}"));
        let submission: ConsentSubmission = if is_json {
            let Json(submission) = Json::<ConsentSubmission>::from_request(request, &())
                .await
                .map_err(|e: JsonRejection| malformed(e.body_text()))?;
            submission
        } else {
            let Form(submission) = Form::<ConsentSubmission>::from_request(request, &())
                .await
                .map_err(|e: FormRejection| malformed(e.body_text()))?;
            submission
        };

        let redirect = resources.oauth2.submit_consent(&submission, user).await?;
        Ok(no_store(Json(redirect).into_response()))
    }

    /// Handle `POST /token`
    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        peer: Peer,
        basic: BasicAuth,
        form: Result<Form<TokenRequest>, FormRejection>,
    ) -> Response {
        if let Err(response) = Self::rate_limit(&resources, RateLimitedEndpoint::Token, peer) {
            return response;
        }
        let result = async {
            let Form(request) = form.map_err(|e| {
                OAuth2Error::InvalidRequest(format!("malformed token request: {}", e.body_text()))
            })?;
            let credentials = Self::client_credentials(
                basic,
                request.client_id.as_deref(),
                request.client_secret.as_deref(),
            )?;
            resources.oauth2.token(&request, &credentials).await
        }
        .await;

        match result {
            Ok(response) => no_store(Json(response).into_response()),
            Err(error) => {
                if error.is_security_event() {
                    warn!("Token request rejected after security event: {error}");
                } else {
                    debug!("Token request rejected: {error}");
                }
                error.into_response()
            }
        }
    }

    /// Handle `GET|POST /userinfo`
    async fn handle_userinfo(
        State(resources): State<Arc<ServerResources>>,
        bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ) -> Result<Response, OAuth2Error> {
        let Some(TypedHeader(Authorization(bearer))) = bearer else {
            return Err(OAuth2Error::InvalidToken(
                "missing bearer token".to_owned(),
            ));
        };
        let claims = resources.oauth2.userinfo(bearer.token()).await?;
        Ok(no_store(Json(claims).into_response()))
    }

    /// Handle `GET /.well-known/jwks.json`
    async fn handle_jwks(State(resources): State<Arc<ServerResources>>) -> Response {
        let jwks = resources.oauth2.jwks().await;
        let mut response = Json(jwks).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL));
        response
    }

    /// Handle the discovery documents
    async fn handle_discovery(State(resources): State<Arc<ServerResources>>) -> Response {
        Json(resources.oauth2.metadata()).into_response()
    }

    /// Handle `POST /oauth2/register`
    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        peer: Peer,
        body: Result<Json<ClientRegistrationRequest>, JsonRejection>,
    ) -> Response {
        if let Err(response) = Self::rate_limit(&resources, RateLimitedEndpoint::Register, peer) {
            return response;
        }
        let result = async {
            let Json(request) = body.map_err(|e| {
                OAuth2Error::InvalidRequest(format!("malformed registration: {}", e.body_text()))
            })?;
            resources.oauth2.register(request).await
        }
        .await;
        match result {
            Ok(registered) => no_store((StatusCode::CREATED, Json(registered)).into_response()),
            Err(error) => error.into_response(),
        }
    }

    /// Handle `POST /oauth2/revoke`
    async fn handle_revoke(
        State(resources): State<Arc<ServerResources>>,
        basic: BasicAuth,
        form: Result<Form<RevokeRequest>, FormRejection>,
    ) -> Result<Response, OAuth2Error> {
        let Form(request) = form.map_err(|e| {
            OAuth2Error::InvalidRequest(format!("malformed revocation request: {}", e.body_text()))
        })?;
        let credentials = Self::client_credentials(
            basic,
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        )?;
        resources.oauth2.revoke(&request, &credentials).await?;
        Ok(no_store(StatusCode::OK.into_response()))
    }

    /// Handle `POST /oauth2/introspect`
    async fn handle_introspect(
        State(resources): State<Arc<ServerResources>>,
        basic: BasicAuth,
        form: Result<Form<IntrospectRequest>, FormRejection>,
    ) -> Result<Response, OAuth2Error> {
        let Form(request) = form.map_err(|e| {
            OAuth2Error::InvalidRequest(format!(
                "malformed introspection request: {}",
                e.body_text()
            ))
        })?;
        let credentials = Self::client_credentials(
            basic,
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        )?;
        let introspection = resources.oauth2.introspect(&request, &credentials).await?;
        Ok(no_store(Json(introspection).into_response()))
    }
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// 302 Found to `location`
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => no_store((StatusCode::FOUND, [(LOCATION, value)]).into_response()),
        Err(_) => error_page(&OAuth2Error::ServerError(
            "redirect target is not a valid header value".to_owned(),
        )),
    }
}

fn rate_limited_response(status: &OAuth2RateLimitStatus) -> Response {
    let retry_after = status.retry_after_seconds.unwrap_or(60);
    let error = OAuth2Error::TemporarilyUnavailable(format!(
        "Rate limit exceeded. Retry after {retry_after} seconds."
    ));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(error.to_response())).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset_at));
    response
}

/// HTML error page for authorization errors that must not be redirected
fn error_page(error: &OAuth2Error) -> Response {
    let title = match error.error_code() {
        "invalid_client" => "Invalid Client",
        "invalid_request" => "Invalid Request",
        "unauthorized_client" => "Unauthorized Client",
        "access_denied" => "Access Denied",
        "invalid_scope" => "Invalid Scope",
        "temporarily_unavailable" => "Temporarily Unavailable",
        "server_error" => "Server Error",
        _ => "Authorization Error",
    };
    let status = match error {
        OAuth2Error::InvalidClient(_) | OAuth2Error::InvalidRedirect(_) => StatusCode::BAD_REQUEST,
        other => StatusCode::from_u16(other.http_status()).unwrap_or(StatusCode::BAD_REQUEST),
    };
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<h1>{title}</h1>
<p class="error-code">{code}</p>
<p class="description">{description}</p>
</body>
</html>
"#,
        code = html_escape::encode_text(error.error_code()),
        description = html_escape::encode_text(&error.public_description()),
    );
    no_store((status, Html(body)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_credentials_are_used_without_basic() {
        let credentials =
            OAuth2Routes::client_credentials(None, Some("spa"), None).unwrap();
        assert_eq!(credentials.client_id, "spa");
        assert!(credentials.client_secret.is_none());
    }

    #[test]
    fn test_missing_client_id_is_invalid_client() {
        let err = OAuth2Routes::client_credentials(None, None, None).unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");
    }

    #[test]
    fn test_basic_and_form_secret_together_are_rejected() {
        let basic = Some(TypedHeader(Authorization::basic("web", "s3cret")));
        let err = OAuth2Routes::client_credentials(basic, None, Some("s3cret")).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[test]
    fn test_basic_credentials_are_percent_decoded() {
        let basic = Some(TypedHeader(Authorization::basic("web%3Aapp", "a%2Bb")));
        let credentials = OAuth2Routes::client_credentials(basic, None, None).unwrap();
        assert_eq!(credentials.client_id, "web:app");
        assert_eq!(credentials.client_secret.as_deref(), Some("a+b"));
    }

    #[test]
    fn test_error_page_escapes_description() {
        let response = error_page(&OAuth2Error::InvalidRedirect("<script>".to_owned()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
