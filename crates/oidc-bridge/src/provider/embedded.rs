//! In-process protocol engine.
//!
//! Decides which prompt an authorization request needs, hands pending requests
//! to the interaction screens, and issues codes and tokens once they resume.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::clients::ClientRegistry;
use super::pkce;
use super::store::{ProviderStore, TokenInfo, TokenKind, TokenPair};
use super::types::{Interaction, Submission};
use super::{
    AuthorizationParams, ClientMetadata, InteractionSession, PriorSession, ProtocolEngine, Prompt,
    ResumeOptions, ResumeResult, Resumption, SessionChange,
};
use crate::config::TtlConfig;
use crate::config::claims::{SCOPE_CLAIMS, SUPPORTED_SCOPES};
use crate::error::{EngineError, EngineResult, OAuthError};

/// Grant types the provider implements.
pub const SUPPORTED_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token", "client_credentials"];

/// Client authentication methods the token endpoint accepts.
pub const SUPPORTED_AUTH_METHODS: &[&str] = &["client_secret_basic", "client_secret_post", "none"];

/// Raw `/auth` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
}

/// Client credentials presented at the token, introspection or revocation endpoints.
#[derive(Debug, Default)]
pub struct ClientCredentials {
    /// From `Authorization: Basic`.
    pub basic: Option<(String, String)>,
    /// From the form body.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// RFC 7591 registration request.
#[derive(Debug, Default, Deserialize)]
pub struct RegistrationRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
    pub scope: Option<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
}

/// Next action for an authorization request.
enum Step {
    Prompt(Prompt),
    Issue { account_id: String },
}

/// The embedded OpenID Connect provider.
pub struct EmbeddedProvider {
    issuer: String,
    clients: ClientRegistry,
    store: Arc<ProviderStore>,
}

impl EmbeddedProvider {
    #[must_use]
    pub fn new(issuer: impl Into<String>, clients: ClientRegistry, ttl: TtlConfig) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            clients,
            store: Arc::new(ProviderStore::new(ttl)),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ProviderStore> {
        &self.store
    }

    /// Static clients first, then dynamically registered ones.
    pub async fn client(&self, client_id: &str) -> Option<ClientMetadata> {
        if let Some(client) = self.clients.get(client_id) {
            return Some(client.clone());
        }
        self.store.get_client(client_id).await
    }

    // ─── Authorization endpoint ──────────────────────────────────────────────

    /// Validate an authorization request and return where to send the browser.
    ///
    /// Errors that cannot be reported to a verified redirect URI are returned as
    /// `Err`; everything else becomes an error redirect to the client.
    pub async fn authorize(
        &self,
        query: AuthorizeQuery,
        session_id: Option<&str>,
    ) -> Result<String, OAuthError> {
        let Some(client_id) = query.client_id.as_deref() else {
            return Err(OAuthError::invalid_request("Missing client_id"));
        };
        let Some(client) = self.client(client_id).await else {
            return Err(OAuthError::invalid_request("Unknown client_id"));
        };
        let Some(redirect_uri) = query.redirect_uri.as_deref() else {
            return Err(OAuthError::invalid_request("Missing redirect_uri"));
        };
        if !client.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::invalid_request("redirect_uri not registered for this client"));
        }

        let state = query.state.as_deref();
        let fail = |error: &str, description: &str| {
            redirect_with(redirect_uri, &error_pairs(error, description, state))
        };

        if query.response_type.as_deref() != Some("code") || !client.allows_response_type("code") {
            return Ok(fail("unsupported_response_type", "response_type must be 'code'"));
        }
        if !client.allows_grant("authorization_code") {
            return Ok(fail("unauthorized_client", "client may not use the authorization code grant"));
        }
        let Some(code_challenge) = query.code_challenge.as_deref() else {
            return Ok(fail("invalid_request", "Missing code_challenge"));
        };
        if query.code_challenge_method.as_deref() != Some(pkce::METHOD_S256) {
            return Ok(fail("invalid_request", "code_challenge_method must be 'S256'"));
        }
        if !pkce::is_valid_challenge(code_challenge) {
            return Ok(fail("invalid_request", "Malformed code_challenge"));
        }

        let mut params = AuthorizationParams {
            client_id: client_id.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
            response_type: "code".to_owned(),
            scope: query.scope.clone().unwrap_or_else(|| "openid".to_owned()),
            state: query.state.clone(),
            code_challenge: code_challenge.to_owned(),
            code_challenge_method: pkce::METHOD_S256.to_owned(),
            prompt: query.prompt.clone(),
            login_hint: query.login_hint.clone(),
        };

        let scopes = params.scopes();
        if !scopes.iter().any(|s| s == "openid") {
            return Ok(fail("invalid_scope", "openid scope is required"));
        }
        if !client.allows_scopes(&scopes) {
            return Ok(fail("invalid_scope", "requested scope is not allowed for this client"));
        }
        params.scope = scopes.join(" ");

        let live_session = match session_id {
            Some(id) if self.store.get_session(id).await.is_some() => Some(id.to_owned()),
            _ => None,
        };

        tracing::info!(client_id = %client_id, scope = %params.scope, "Authorization request");

        Ok(self.continue_authorization(params, live_session, Submission::default()).await)
    }

    /// Evaluate the next step and either open an interaction or issue a code.
    async fn continue_authorization(
        &self,
        params: AuthorizationParams,
        session_id: Option<String>,
        submission: Submission,
    ) -> String {
        let session = self.prior_session(session_id.as_deref()).await;

        match self.next_step(&params, session.as_ref(), &submission).await {
            Step::Prompt(prompt) if params.prompts("none") => {
                let error = match prompt {
                    Prompt::Consent { .. } => "consent_required",
                    Prompt::SelectAccount => "account_selection_required",
                    _ => "login_required",
                };
                redirect_with(
                    &params.redirect_uri,
                    &error_pairs(error, "End-User interaction is required", params.state.as_deref()),
                )
            }
            Step::Prompt(prompt) => {
                let uid = ProviderStore::generate_token();
                tracing::info!(uid = %uid, prompt = prompt.name(), client_id = %params.client_id, "Interaction required");

                self.store
                    .insert_interaction(Interaction {
                        uid: uid.clone(),
                        prompt,
                        params,
                        session_id,
                        submission,
                        created_at: Utc::now(),
                    })
                    .await;

                format!("/interaction/{uid}")
            }
            Step::Issue { account_id } => {
                let code = self
                    .store
                    .create_auth_code(
                        params.client_id.clone(),
                        account_id.clone(),
                        params.redirect_uri.clone(),
                        params.code_challenge.clone(),
                        params.scope.clone(),
                    )
                    .await;

                tracing::info!(client_id = %params.client_id, account = %account_id, "Issued authorization code");

                let mut pairs = vec![("code", code.as_str())];
                if let Some(ref state) = params.state {
                    pairs.push(("state", state.as_str()));
                }
                redirect_with(&params.redirect_uri, &pairs)
            }
        }
    }

    async fn next_step(
        &self,
        params: &AuthorizationParams,
        session: Option<&PriorSession>,
        submission: &Submission,
    ) -> Step {
        let account_id = match submission.login {
            Some(ref account) => account.clone(),
            None => {
                if params.prompts("select_account") && !submission.account_selected {
                    return Step::Prompt(Prompt::SelectAccount);
                }
                match session {
                    Some(s) if !params.prompts("login") => s.account_id.clone(),
                    _ => return Step::Prompt(Prompt::Login),
                }
            }
        };

        if !submission.consent {
            let granted = self.store.granted_scopes(&account_id, &params.client_id).await;
            let missing_scopes: Vec<String> =
                params.scopes().into_iter().filter(|s| !granted.contains(s)).collect();

            if !missing_scopes.is_empty() || params.prompts("consent") {
                return Step::Prompt(Prompt::Consent { missing_scopes });
            }
        }

        Step::Issue { account_id }
    }

    async fn prior_session(&self, session_id: Option<&str>) -> Option<PriorSession> {
        let session = self.store.get_session(session_id?).await?;
        Some(PriorSession {
            account_id: session.account_id,
            authenticated_at: session.created_at.timestamp(),
        })
    }

    // ─── Token endpoint ──────────────────────────────────────────────────────

    /// Authenticate the calling client.
    pub async fn authenticate_client(
        &self,
        credentials: ClientCredentials,
    ) -> Result<ClientMetadata, OAuthError> {
        let (client_id, secret) = match credentials.basic {
            Some((id, secret)) => (id, Some(secret)),
            None => match credentials.client_id {
                Some(id) => (id, credentials.client_secret),
                None => return Err(OAuthError::invalid_client("Missing client credentials")),
            },
        };

        let Some(client) = self.client(&client_id).await else {
            return Err(OAuthError::invalid_client("Client authentication failed"));
        };

        if client.is_confidential() {
            let verified = secret.as_deref().is_some_and(|s| client.verify_secret(s));
            if !verified {
                tracing::warn!(client_id = %client_id, "Client authentication failed");
                return Err(OAuthError::invalid_client("Client authentication failed"));
            }
        }

        Ok(client)
    }

    /// `authorization_code` grant.
    pub async fn exchange_code(
        &self,
        client: &ClientMetadata,
        code: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        let Some(code) = code else {
            return Err(OAuthError::invalid_request("Missing code"));
        };
        let Some(code_verifier) = code_verifier else {
            return Err(OAuthError::invalid_request("Missing code_verifier"));
        };

        // Consume the auth code (one-time)
        let Some(auth_code) = self.store.consume_auth_code(code).await else {
            return Err(OAuthError::invalid_grant("Invalid or expired authorization code"));
        };

        if auth_code.client_id != client.client_id {
            return Err(OAuthError::invalid_grant("Authorization code was issued to another client"));
        }
        if let Some(redirect_uri) = redirect_uri {
            if redirect_uri != auth_code.redirect_uri {
                return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
            }
        }
        if !pkce::verify_s256(code_verifier, &auth_code.code_challenge) {
            return Err(OAuthError::invalid_grant("PKCE verification failed"));
        }

        let pair = self
            .store
            .create_token_pair(
                &client.client_id,
                &auth_code.account_id,
                &auth_code.scope,
                client.allows_grant("refresh_token"),
            )
            .await;

        tracing::info!(client_id = %client.client_id, account = %auth_code.account_id, "Issued token pair");
        Ok(pair)
    }

    /// `refresh_token` grant.
    pub async fn refresh(
        &self,
        client: &ClientMetadata,
        refresh_token: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        if !client.allows_grant("refresh_token") {
            return Err(OAuthError::new("unauthorized_client", "client may not use refresh tokens"));
        }
        let Some(refresh_token) = refresh_token else {
            return Err(OAuthError::invalid_request("Missing refresh_token"));
        };

        let Some(pair) = self.store.refresh_token_pair(refresh_token, &client.client_id).await else {
            return Err(OAuthError::invalid_grant("Invalid or expired refresh token"));
        };

        tracing::info!(client_id = %client.client_id, "Refreshed token pair");
        Ok(pair)
    }

    /// `client_credentials` grant.
    pub async fn client_credentials(
        &self,
        client: &ClientMetadata,
        scope: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        if !client.allows_grant("client_credentials") {
            return Err(OAuthError::new(
                "unauthorized_client",
                "client may not use the client credentials grant",
            ));
        }
        if !client.is_confidential() {
            return Err(OAuthError::invalid_client("public clients cannot use client credentials"));
        }

        let scopes: Vec<String> =
            scope.unwrap_or_default().split_whitespace().map(str::to_owned).collect();
        if !client.allows_scopes(&scopes) {
            return Err(OAuthError::new("invalid_scope", "requested scope is not allowed"));
        }

        let pair = self.store.create_client_token(&client.client_id, &scopes.join(" ")).await;
        tracing::info!(client_id = %client.client_id, "Issued client credentials token");
        Ok(pair)
    }

    /// RFC 7662 introspection response.
    pub async fn introspect(&self, token: &str) -> serde_json::Value {
        let info = match self.store.access_token_info(token).await {
            Some(info) => Some(info),
            None => self.store.refresh_token_info(token).await,
        };

        let Some(info) = info else {
            return serde_json::json!({ "active": false });
        };

        let TokenInfo { client_id, account_id, scope, issued_at, expires_at, kind } = info;
        let mut body = serde_json::json!({
            "active": true,
            "client_id": client_id,
            "scope": scope,
            "iat": issued_at,
            "exp": expires_at,
            "iss": self.issuer,
            "token_type": match kind {
                TokenKind::AccessToken => "Bearer",
                TokenKind::RefreshToken => "refresh_token",
            },
        });
        if let Some(sub) = account_id {
            body["sub"] = serde_json::Value::String(sub);
        }
        body
    }

    /// RFC 7009 revocation. Unknown tokens are ignored.
    pub async fn revoke(&self, client: &ClientMetadata, token: &str) {
        if self.store.revoke(token, &client.client_id).await {
            tracing::info!(client_id = %client.client_id, "Revoked token");
        }
    }

    /// Look up a live access token for the userinfo endpoint.
    pub async fn access_token(&self, token: &str) -> Option<TokenInfo> {
        self.store.access_token_info(token).await
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Validate and store a dynamically registered client.
    ///
    /// Returns the metadata (including any generated secret) and the registration access token.
    pub async fn register_client(
        &self,
        req: RegistrationRequest,
    ) -> Result<(ClientMetadata, String), OAuthError> {
        let grant_types = if req.grant_types.is_empty() {
            vec!["authorization_code".to_owned()]
        } else {
            req.grant_types
        };
        if let Some(unsupported) =
            grant_types.iter().find(|g| !SUPPORTED_GRANT_TYPES.contains(&g.as_str()))
        {
            return Err(OAuthError::new(
                "invalid_client_metadata",
                format!("unsupported grant type '{unsupported}'"),
            ));
        }

        let uses_code = grant_types.iter().any(|g| g == "authorization_code");
        let response_types = if !req.response_types.is_empty() {
            req.response_types
        } else if uses_code {
            vec!["code".to_owned()]
        } else {
            Vec::new()
        };
        if response_types.iter().any(|r| r != "code") {
            return Err(OAuthError::new("invalid_client_metadata", "only response_type 'code' is supported"));
        }

        let redirect_uris = req.redirect_uris.unwrap_or_default();
        if uses_code && redirect_uris.is_empty() {
            return Err(OAuthError::new("invalid_client_metadata", "redirect_uris is required"));
        }
        if let Some(bad) = redirect_uris.iter().find(|u| url::Url::parse(u).is_err()) {
            return Err(OAuthError::new("invalid_redirect_uri", format!("'{bad}' is not an absolute URL")));
        }

        let auth_method =
            req.token_endpoint_auth_method.unwrap_or_else(|| "client_secret_basic".to_owned());
        if !SUPPORTED_AUTH_METHODS.contains(&auth_method.as_str()) {
            return Err(OAuthError::new(
                "invalid_client_metadata",
                format!("unsupported token_endpoint_auth_method '{auth_method}'"),
            ));
        }
        let confidential = auth_method != "none";
        if !confidential && grant_types.iter().any(|g| g == "client_credentials") {
            return Err(OAuthError::new(
                "invalid_client_metadata",
                "client_credentials requires a confidential client",
            ));
        }

        if let Some(ref scope) = req.scope {
            if let Some(bad) = scope.split_whitespace().find(|s| !SUPPORTED_SCOPES.contains(s)) {
                return Err(OAuthError::new("invalid_client_metadata", format!("unsupported scope '{bad}'")));
            }
        }

        let metadata = ClientMetadata {
            client_id: uuid::Uuid::new_v4().simple().to_string(),
            client_secret: confidential.then(ProviderStore::generate_token),
            client_name: req.client_name,
            redirect_uris,
            response_types,
            grant_types,
            scope: req.scope,
            token_endpoint_auth_method: auth_method,
            post_logout_redirect_uris: req.post_logout_redirect_uris,
        };

        let registration_access_token = self.store.register_client(metadata.clone()).await;
        tracing::info!(client_id = %metadata.client_id, "Registered client");

        Ok((metadata, registration_access_token))
    }

    // ─── Discovery ───────────────────────────────────────────────────────────

    /// OpenID Provider metadata.
    #[must_use]
    pub fn discovery(&self) -> serde_json::Value {
        let issuer = &self.issuer;
        let claims_supported: Vec<&str> =
            SCOPE_CLAIMS.iter().flat_map(|(_, claims)| claims.iter().copied()).collect();

        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/auth"),
            "token_endpoint": format!("{issuer}/token"),
            "userinfo_endpoint": format!("{issuer}/me"),
            "registration_endpoint": format!("{issuer}/reg"),
            "introspection_endpoint": format!("{issuer}/token/introspection"),
            "revocation_endpoint": format!("{issuer}/token/revocation"),
            "scopes_supported": SUPPORTED_SCOPES,
            "claims_supported": claims_supported,
            "response_types_supported": ["code"],
            "response_modes_supported": ["query"],
            "grant_types_supported": SUPPORTED_GRANT_TYPES,
            "subject_types_supported": ["public"],
            "token_endpoint_auth_methods_supported": SUPPORTED_AUTH_METHODS,
            "code_challenge_methods_supported": [pkce::METHOD_S256],
            "prompt_values_supported": ["none", "login", "consent", "select_account"],
            "claims_parameter_supported": false,
            "request_parameter_supported": false
        })
    }
}

#[async_trait]
impl ProtocolEngine for EmbeddedProvider {
    async fn interaction_details(&self, uid: &str) -> EngineResult<InteractionSession> {
        let interaction = self
            .store
            .get_interaction(uid)
            .await
            .ok_or_else(|| EngineError::InteractionNotFound(uid.to_owned()))?;
        let session = self.prior_session(interaction.session_id.as_deref()).await;

        Ok(InteractionSession {
            uid: interaction.uid,
            prompt: interaction.prompt,
            params: interaction.params,
            session,
        })
    }

    async fn resume_interaction(
        &self,
        uid: &str,
        result: ResumeResult,
        options: ResumeOptions,
    ) -> EngineResult<Resumption> {
        let interaction = self
            .store
            .take_interaction(uid)
            .await
            .ok_or_else(|| EngineError::InteractionNotFound(uid.to_owned()))?;

        let Interaction { prompt, params, session_id, submission: last, .. } = interaction;
        let mut submission =
            if options.merge_with_last_submission { last } else { Submission::default() };
        let mut session_id = session_id;
        let mut change = SessionChange::Keep;

        tracing::info!(uid = %uid, prompt = prompt.name(), merge = options.merge_with_last_submission, "Resuming interaction");

        match result {
            ResumeResult::Error { error, error_description } => {
                let location = redirect_with(
                    &params.redirect_uri,
                    &error_pairs(&error, &error_description, params.state.as_deref()),
                );
                return Ok(Resumption { location, session: SessionChange::Keep });
            }
            ResumeResult::Login { account } => {
                if account.is_empty() {
                    return Err(EngineError::invalid_result("login result without an account"));
                }
                if let Some(ref old) = session_id {
                    self.store.remove_session(old).await;
                }
                let new_session = self.store.create_session(&account).await;
                submission.login = Some(account);
                change = SessionChange::Set(new_session.clone());
                session_id = Some(new_session);
            }
            ResumeResult::SelectAccount {} => {
                if let Some(ref old) = session_id {
                    self.store.remove_session(old).await;
                }
                session_id = None;
                submission.login = None;
                submission.account_selected = true;
                change = SessionChange::Clear;
            }
            ResumeResult::Consent {} => {
                let session_account = self
                    .prior_session(session_id.as_deref())
                    .await
                    .map(|s| s.account_id);

                match prompt {
                    Prompt::Consent { .. } => {
                        let Some(account) = submission.login.clone().or(session_account) else {
                            return Err(EngineError::invalid_result("consent submitted before login"));
                        };
                        self.store.grant_scopes(&account, &params.client_id, &params.scopes()).await;
                        submission.login = Some(account);
                        submission.consent = true;
                    }
                    Prompt::SelectAccount => {
                        let Some(account) = session_account else {
                            return Err(EngineError::invalid_result("no session to continue with"));
                        };
                        submission.login = Some(account);
                        submission.account_selected = true;
                    }
                    other => {
                        return Err(EngineError::invalid_result(format!(
                            "consent is not valid for prompt '{}'",
                            other.name()
                        )));
                    }
                }
            }
        }

        let location = self.continue_authorization(params, session_id, submission).await;
        Ok(Resumption { location, session: change })
    }

    async fn find_client(&self, client_id: &str) -> Option<ClientMetadata> {
        self.client(client_id).await
    }
}

impl std::fmt::Debug for EmbeddedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedProvider")
            .field("issuer", &self.issuer)
            .field("static_clients", &self.clients.len())
            .finish()
    }
}

fn error_pairs<'a>(error: &'a str, description: &'a str, state: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    let mut pairs = vec![("error", error), ("error_description", description)];
    if let Some(state) = state {
        pairs.push(("state", state));
    }
    pairs
}

/// Append query parameters to a client redirect URI.
fn redirect_with(redirect_uri: &str, pairs: &[(&str, &str)]) -> String {
    match url::Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(pairs);
            url.to_string()
        }
        Err(_) => {
            let query = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
            let sep = if redirect_uri.contains('?') { '&' } else { '?' };
            format!("{redirect_uri}{sep}{query}")
        }
    }
}
