//! HTTP handlers for the embedded provider's protocol endpoints.
//!
//! Implements:
//! - OpenID Connect Discovery 1.0
//! - RFC 6749: Authorization and Token endpoints
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 7591 / 7592: Dynamic Client Registration
//! - OpenID Connect Core §5.3: UserInfo

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::ClientMetadata;
use super::embedded::{AuthorizeQuery, ClientCredentials, RegistrationRequest};
use super::store::TokenPair;
use crate::account::claims;
use crate::error::OAuthError;
use crate::interaction::views::render_error_page;
use crate::server::HttpState;

// ─── Discovery ───────────────────────────────────────────────────────────────

/// `GET /.well-known/openid-configuration`
pub async fn handle_discovery(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.provider.discovery())
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /auth`
///
/// Redirects either to the client (code or error) or to an interaction screen.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let session_id = jar.get(&state.session_cookie).map(|c| c.value().to_owned());

    match state.provider.authorize(query, session_id.as_deref()).await {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        // The redirect URI is not trusted, so the error is shown to the user instead.
        Err(e) => {
            tracing::warn!(error = e.error, description = %e.description, "Rejected authorization request");
            (e.status, Html(render_error_page(e.status, &e.description))).into_response()
        }
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// `POST /token`
///
/// Exchange an authorization code, rotate a refresh token, or issue a client
/// credentials token.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(mut form): Form<TokenRequest>,
) -> Response {
    let credentials =
        client_credentials(&headers, form.client_id.take(), form.client_secret.take());
    let client = match state.provider.authenticate_client(credentials).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };

    let provider = &state.provider;
    let result = match form.grant_type.as_deref() {
        Some("authorization_code") => {
            provider
                .exchange_code(
                    &client,
                    form.code.as_deref(),
                    form.redirect_uri.as_deref(),
                    form.code_verifier.as_deref(),
                )
                .await
        }
        Some("refresh_token") => provider.refresh(&client, form.refresh_token.as_deref()).await,
        Some("client_credentials") => {
            provider.client_credentials(&client, form.scope.as_deref()).await
        }
        Some(_) => Err(OAuthError::new("unsupported_grant_type", "grant_type is not supported")),
        None => Err(OAuthError::invalid_request("Missing grant_type")),
    };

    match result {
        Ok(pair) => token_success(&pair),
        Err(e) => e.into_response(),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(pair: &TokenPair) -> Response {
    let mut body = serde_json::json!({
        "access_token": pair.access_token,
        "token_type": "Bearer",
        "expires_in": pair.expires_in,
        "scope": pair.scope
    });
    if let Some(ref refresh) = pair.refresh_token {
        body["refresh_token"] = serde_json::Value::String(refresh.clone());
    }

    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// ─── RFC 7662 / 7009: Introspection and Revocation ───────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenLookupRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// `POST /token/introspection`
pub async fn handle_introspection(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(mut form): Form<TokenLookupRequest>,
) -> Response {
    let credentials =
        client_credentials(&headers, form.client_id.take(), form.client_secret.take());
    if let Err(e) = state.provider.authenticate_client(credentials).await {
        return e.into_response();
    }
    let Some(token) = form.token else {
        return OAuthError::invalid_request("Missing token").into_response();
    };

    let mut response = Json(state.provider.introspect(&token).await).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// `POST /token/revocation`
///
/// Always answers 200 for authenticated clients, whether or not the token existed.
pub async fn handle_revocation(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(mut form): Form<TokenLookupRequest>,
) -> Response {
    let credentials =
        client_credentials(&headers, form.client_id.take(), form.client_secret.take());
    let client = match state.provider.authenticate_client(credentials).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };
    let Some(token) = form.token else {
        return OAuthError::invalid_request("Missing token").into_response();
    };

    state.provider.revoke(&client, &token).await;
    StatusCode::OK.into_response()
}

// ─── UserInfo ────────────────────────────────────────────────────────────────

/// `GET /me`
///
/// Claims of the token's subject, filtered by the token's scope.
pub async fn handle_userinfo(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return OAuthError::invalid_token("Missing bearer token").into_response();
    };
    let Some(info) = state.provider.access_token(token).await else {
        return OAuthError::invalid_token("Invalid or expired access token").into_response();
    };
    let Some(ref subject) = info.account_id else {
        return OAuthError::invalid_token("Token has no end-user subject").into_response();
    };
    if !info.scope.split_whitespace().any(|s| s == "openid") {
        return OAuthError {
            status: StatusCode::FORBIDDEN,
            ..OAuthError::new("insufficient_scope", "openid scope is required")
        }
        .into_response();
    }

    match state.resolver.resolve(subject).await {
        Ok(Some(identity)) => {
            let mut response = Json(claims(&identity, &info.scope)).into_response();
            response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Ok(None) => OAuthError::invalid_token("Subject no longer exists").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Account lookup failed for userinfo");
            OAuthError::server_error("Account store unavailable").into_response()
        }
    }
}

// ─── RFC 7591 / 7592: Dynamic Client Registration ────────────────────────────

/// `POST /reg`
///
/// Register a new client. Requires the initial access token when one is configured.
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<RegistrationRequest>,
) -> Response {
    if let Some(ref expected) = state.initial_access_token {
        let authorized = bearer_token(&headers)
            .is_some_and(|t| bool::from(t.as_bytes().ct_eq(expected.as_bytes())));
        if !authorized {
            return OAuthError::invalid_token("Invalid initial access token").into_response();
        }
    }

    match state.provider.register_client(req).await {
        Ok((client, registration_access_token)) => {
            let mut body = registration_body(state.provider.issuer(), &client);
            body["registration_access_token"] = serde_json::Value::String(registration_access_token);
            let mut response = (StatusCode::CREATED, Json(body)).into_response();
            response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /reg/{client_id}`
///
/// Read back a registered client with its registration access token.
pub async fn handle_client_read(
    State(state): State<Arc<HttpState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return OAuthError::invalid_token("Missing registration access token").into_response();
    };
    let Some(client) = state.provider.store().get_client_for_management(&client_id, token).await else {
        return OAuthError::invalid_token("Invalid registration access token").into_response();
    };

    let mut response = Json(registration_body(state.provider.issuer(), &client)).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn registration_body(issuer: &str, client: &ClientMetadata) -> serde_json::Value {
    let mut body = serde_json::json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "redirect_uris": client.redirect_uris,
        "grant_types": client.grant_types,
        "response_types": client.response_types,
        "token_endpoint_auth_method": client.token_endpoint_auth_method,
        "post_logout_redirect_uris": client.post_logout_redirect_uris,
        "registration_client_uri": format!("{issuer}/reg/{}", client.client_id),
    });
    if let Some(ref scope) = client.scope {
        body["scope"] = serde_json::Value::String(scope.clone());
    }
    if let Some(ref secret) = client.client_secret {
        body["client_secret"] = serde_json::Value::String(secret.clone());
    }
    body
}

// ─── Credentials ─────────────────────────────────────────────────────────────

fn client_credentials(
    headers: &HeaderMap,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> ClientCredentials {
    ClientCredentials { basic: basic_credentials(headers), client_id, client_secret }
}

/// Decode `Authorization: Basic` client credentials (RFC 6749 §2.3.1).
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((form_decode(id), form_decode(secret)))
}

/// Undo `application/x-www-form-urlencoded` encoding of a single value.
fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let encoded = STANDARD.encode("auth_test:123");
        let creds = basic_credentials(&headers_with(&format!("Basic {encoded}")));
        assert_eq!(creds, Some(("auth_test".into(), "123".into())));
    }

    #[test]
    fn test_basic_credentials_are_form_decoded() {
        let encoded = STANDARD.encode("my%3Aclient:s%20e+cret");
        let creds = basic_credentials(&headers_with(&format!("Basic {encoded}")));
        assert_eq!(creds, Some(("my:client".into(), "s e cret".into())));
    }

    #[test]
    fn test_malformed_basic_is_ignored() {
        assert!(basic_credentials(&headers_with("Basic !!!")).is_none());
        assert!(basic_credentials(&headers_with("Bearer abc")).is_none());
        assert!(basic_credentials(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
    }
}
