//! End-to-end tests for the interaction screens and the embedded provider via HTTP.
//!
//! Drives the actual axum `Router` with `oneshot`, following redirects by hand.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use oidc_bridge::account::{AccountRecord, CredentialVerifier, MemoryAccountStore};
use oidc_bridge::config::Config;
use oidc_bridge::provider::ClientMetadata;
use oidc_bridge::provider::clients::{ClientRegistry, default_clients};
use oidc_bridge::server::AuthServer;

const ISSUER: &str = "http://localhost:8888";
const REDIRECT_URI: &str = "https://app.example/cb";
const CODE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

fn web_client() -> ClientMetadata {
    ClientMetadata {
        client_id: "web".into(),
        client_secret: Some("web-secret".into()),
        client_name: Some("Web App".into()),
        redirect_uris: vec![REDIRECT_URI.into()],
        response_types: vec!["code".into()],
        grant_types: vec!["authorization_code".into(), "refresh_token".into()],
        scope: None,
        token_endpoint_auth_method: "client_secret_basic".into(),
        post_logout_redirect_uris: vec![],
    }
}

fn build_app(config: &Config) -> axum::Router {
    let verifier = CredentialVerifier::new(&config.hashing).unwrap();
    let store = MemoryAccountStore::from_records([AccountRecord::new("u1", "test", "test")]).unwrap();
    let mut clients = default_clients();
    clients.push(web_client());

    AuthServer::new(config, Arc::new(store), ClientRegistry::new(clients).unwrap(), verifier).router()
}

fn test_app() -> axum::Router {
    build_app(&Config::for_testing(ISSUER))
}

fn authorize_uri(scope: &str, prompt: Option<&str>) -> String {
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(CODE_VERIFIER.as_bytes()));
    let mut params = vec![
        ("client_id", "web"),
        ("redirect_uri", REDIRECT_URI),
        ("response_type", "code"),
        ("scope", scope),
        ("state", "xyz"),
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
    ];
    if let Some(prompt) = prompt {
        params.push(("prompt", prompt));
    }
    format!("/auth?{}", serde_urlencoded::to_string(params).unwrap())
}

async fn get(app: &axum::Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::get(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone().oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
}

async fn post_form(
    app: &axum::Router,
    uri: &str,
    params: &[(&str, &str)],
    headers: &[(header::HeaderName, String)],
) -> Response<Body> {
    let mut request = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let body = Body::from(serde_urlencoded::to_string(params).unwrap());
    app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
}

fn location(response: &Response<Body>) -> String {
    response.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string()
}

/// `name=value` of the session cookie set by a response, if any.
fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("_custom_auth_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_owned)
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn query_pairs(location: &str) -> HashMap<String, String> {
    url::Url::parse(location).unwrap().query_pairs().into_owned().collect()
}

fn basic(id: &str, secret: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Basic {}", STANDARD.encode(format!("{id}:{secret}"))))
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

#[tokio::test]
async fn test_full_login_consent_token_flow() {
    let app = test_app();

    // 1. Authorization request without a session opens a login interaction
    let response = get(&app, &authorize_uri("openid profile", None), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_location = location(&response);
    assert!(login_location.starts_with("/interaction/"));

    // 2. Login screen
    let response = get(&app, &login_location, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("Sign-in"));
    assert!(html.contains("Web App"));

    // 3. Wrong password re-renders in place
    let response = post_form(
        &app,
        &format!("{login_location}/login"),
        &[("loginId", "test"), ("password", "wrong")],
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none());
    let html = body_string(response).await;
    assert!(html.contains("Invalid loginId or password."));
    assert!(html.contains(r#"value="test""#));

    // 4. Correct password resumes and sets the session
    let response = post_form(
        &app,
        &format!("{login_location}/login"),
        &[("loginId", "test"), ("password", "test")],
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response).expect("session cookie");
    let consent_location = location(&response);
    assert!(consent_location.starts_with("/interaction/"));
    assert_ne!(consent_location, login_location);

    // 5. The login uid is dead
    let response = get(&app, &login_location, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("expired or was already completed"));

    // 6. Consent screen lists the requested scopes
    let response = get(&app, &consent_location, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("<li>openid</li>"));
    assert!(html.contains("<li>profile</li>"));

    // 7. Confirm redirects to the client with a code
    let response = post_form(&app, &format!("{consent_location}/confirm"), &[], &[(header::COOKIE, cookie.clone())]).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let callback = location(&response);
    assert!(callback.starts_with(REDIRECT_URI));
    let pairs = query_pairs(&callback);
    assert_eq!(pairs["state"], "xyz");
    let code = pairs["code"].clone();

    // 8. Exchange the code
    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", CODE_VERIFIER),
        ],
        &[basic("web", "web-secret")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "openid profile");
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    // 9. UserInfo exposes claims for the granted scopes
    let response = get_with_bearer(&app, "/me", &access_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let claims = body_json(response).await;
    assert_eq!(claims, serde_json::json!({"sub": "u1", "loginId": "test"}));

    // 10. Refresh rotates the pair and invalidates the old access token
    let response = post_form(
        &app,
        "/token",
        &[("grant_type", "refresh_token"), ("refresh_token", &refresh_token)],
        &[basic("web", "web-secret")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = body_json(response).await;
    assert_ne!(rotated["access_token"], tokens["access_token"]);
    assert_eq!(get_with_bearer(&app, "/me", &access_token).await.status(), StatusCode::UNAUTHORIZED);

    // 11. A second request with the session and an existing grant skips the screens
    let response = get(&app, &authorize_uri("openid profile", None), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with(&format!("{REDIRECT_URI}?code=")));
}

async fn get_with_bearer(app: &axum::Router, uri: &str, token: &str) -> Response<Body> {
    let (name, value) = bearer(token);
    let request = Request::get(uri).header(name, value).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_code_is_single_use() {
    let app = test_app();

    let login_location = location(&get(&app, &authorize_uri("openid", None), None).await);
    let response = post_form(
        &app,
        &format!("{login_location}/login"),
        &[("loginId", "test"), ("password", "test")],
        &[],
    )
    .await;
    let cookie = session_cookie(&response).unwrap();
    let consent_location = location(&response);
    let response = post_form(&app, &format!("{consent_location}/confirm"), &[], &[(header::COOKIE, cookie)]).await;
    let code = query_pairs(&location(&response))["code"].clone();

    let params = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("code_verifier", CODE_VERIFIER),
    ];
    let first = post_form(&app, "/token", &params, &[basic("web", "web-secret")]).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_form(&app, "/token", &params, &[basic("web", "web-secret")]).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(second).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_interaction_responses_disable_caching() {
    let app = test_app();
    let login_location = location(&get(&app, &authorize_uri("openid", None), None).await);

    let response = get(&app, &login_location, None).await;
    assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache, no-store");

    // Error pages too
    let response = get(&app, "/interaction/does-not-exist", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache, no-store");
}

#[tokio::test]
async fn test_abort_redirects_with_access_denied() {
    let app = test_app();
    let login_location = location(&get(&app, &authorize_uri("openid", None), None).await);

    let response = get(&app, &format!("{login_location}/abort"), None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let callback = location(&response);
    assert!(callback.starts_with(REDIRECT_URI));
    let pairs = query_pairs(&callback);
    assert_eq!(pairs["error"], "access_denied");
    assert_eq!(pairs["error_description"], "End-User aborted interaction");
    assert_eq!(pairs["state"], "xyz");

    // The uid cannot be resumed twice
    let response = get(&app, &format!("{login_location}/abort"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_select_account_without_session_falls_through_to_login() {
    let app = test_app();
    let select_location = location(&get(&app, &authorize_uri("openid", Some("select_account")), None).await);

    let response = get(&app, &select_location, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let login_location = location(&response);
    assert!(login_location.starts_with("/interaction/"));

    let html = body_string(get(&app, &login_location, None).await).await;
    assert!(html.contains("Sign-in"));
}

#[tokio::test]
async fn test_select_account_with_session_offers_continue() {
    let app = test_app();

    // Establish a session and a grant
    let login_location = location(&get(&app, &authorize_uri("openid", None), None).await);
    let response = post_form(
        &app,
        &format!("{login_location}/login"),
        &[("loginId", "test"), ("password", "test")],
        &[],
    )
    .await;
    let cookie = session_cookie(&response).unwrap();
    let consent_location = location(&response);
    post_form(&app, &format!("{consent_location}/confirm"), &[], &[(header::COOKIE, cookie.clone())]).await;

    // Ask to pick an account
    let select_location =
        location(&get(&app, &authorize_uri("openid", Some("select_account")), Some(&cookie)).await);
    let html = body_string(get(&app, &select_location, Some(&cookie)).await).await;
    assert!(html.contains("Continue as test"));

    // Continue with the session account
    let response = post_form(&app, &format!("{select_location}/confirm"), &[], &[(header::COOKIE, cookie)]).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with(&format!("{REDIRECT_URI}?code=")));
}

#[tokio::test]
async fn test_authorize_rejects_unknown_client_in_place() {
    let app = test_app();
    let response = get(
        &app,
        "/auth?client_id=nobody&redirect_uri=https%3A%2F%2Fevil.example%2Fcb&response_type=code",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_prompt_none_without_session() {
    let app = test_app();
    let response = get(&app, &authorize_uri("openid", Some("none")), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(query_pairs(&location(&response))["error"], "login_required");
}

#[tokio::test]
async fn test_client_credentials_introspection_and_revocation() {
    let app = test_app();

    let response = post_form(&app, "/token", &[("grant_type", "client_credentials")], &[basic("test", "test")]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = body_json(response).await;
    assert!(tokens.get("refresh_token").is_none());
    assert_eq!(tokens["expires_in"], 600);
    let token = tokens["access_token"].as_str().unwrap().to_string();

    let response = post_form(&app, "/token/introspection", &[("token", &token)], &[basic("test", "test")]).await;
    let info = body_json(response).await;
    assert_eq!(info["active"], true);
    assert_eq!(info["client_id"], "test");
    assert!(info.get("sub").is_none());

    // No end-user subject behind this token
    assert_eq!(get_with_bearer(&app, "/me", &token).await.status(), StatusCode::UNAUTHORIZED);

    let response = post_form(&app, "/token/revocation", &[("token", &token)], &[basic("test", "test")]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_form(&app, "/token/introspection", &[("token", &token)], &[basic("test", "test")]).await;
    assert_eq!(body_json(response).await["active"], false);
}

#[tokio::test]
async fn test_token_endpoint_rejects_bad_client_secret() {
    let app = test_app();
    let response = post_form(&app, "/token", &[("grant_type", "client_credentials")], &[basic("test", "nope")]).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorization_code_client_cannot_use_client_credentials() {
    let app = test_app();
    let response =
        post_form(&app, "/token", &[("grant_type", "client_credentials")], &[basic("auth_test", "123")]).await;
    assert_eq!(body_json(response).await["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_registration_requires_initial_access_token() {
    let mut config = Config::for_testing(ISSUER);
    config.initial_access_token = Some("iat-secret".into());
    let app = build_app(&config);

    let payload = serde_json::json!({
        "client_name": "Registered App",
        "redirect_uris": ["https://registered.example/cb"]
    })
    .to_string();

    let request = Request::post("/reg")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.clone()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::post("/reg")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer iat-secret")
        .body(Body::from(payload))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let client = body_json(response).await;
    let client_id = client["client_id"].as_str().unwrap().to_string();
    let registration_token = client["registration_access_token"].as_str().unwrap().to_string();
    assert!(client["client_secret"].is_string());
    assert_eq!(client["registration_client_uri"], format!("{ISSUER}/reg/{client_id}"));

    // Read back
    let response = get_with_bearer(&app, &format!("/reg/{client_id}"), &registration_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let read = body_json(response).await;
    assert_eq!(read["client_name"], "Registered App");
    assert!(read.get("registration_access_token").is_none());

    let response = get_with_bearer(&app, &format!("/reg/{client_id}"), "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_discovery_and_health() {
    let app = test_app();

    let response = get(&app, "/.well-known/openid-configuration", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["issuer"], ISSUER);
    assert_eq!(metadata["authorization_endpoint"], format!("{ISSUER}/auth"));
    assert_eq!(metadata["code_challenge_methods_supported"], serde_json::json!(["S256"]));

    let response = get(&app, "/ready", None).await;
    let ready = body_json(response).await;
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["account_store"], "memory");

    let response = get(&app, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}
