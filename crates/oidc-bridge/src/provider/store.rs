//! In-memory provider state: interactions, sessions, grants, codes and tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use super::ClientMetadata;
use super::types::{
    AccessToken, AuthCode, BrowserSession, Grant, Interaction, RefreshToken, RegisteredClient,
    is_expired,
};
use crate::config::TtlConfig;

/// Cleanup interval: 5 minutes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// In-memory provider state store.
#[derive(Clone)]
pub struct ProviderStore {
    ttl: TtlConfig,
    clients: Arc<RwLock<HashMap<String, RegisteredClient>>>,
    interactions: Arc<RwLock<HashMap<String, Interaction>>>,
    sessions: Arc<RwLock<HashMap<String, BrowserSession>>>,
    /// Keyed by (account id, client id).
    grants: Arc<RwLock<HashMap<(String, String), Grant>>>,
    auth_codes: Arc<RwLock<HashMap<String, AuthCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
}

impl ProviderStore {
    #[must_use]
    pub fn new(ttl: TtlConfig) -> Self {
        Self {
            ttl,
            clients: Arc::new(RwLock::new(HashMap::new())),
            interactions: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            grants: Arc::new(RwLock::new(HashMap::new())),
            auth_codes: Arc::new(RwLock::new(HashMap::new())),
            access_tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Lifetimes applied by this store.
    #[must_use]
    pub const fn ttl(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Generate a random token using two UUIDs (256 bits).
    pub fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    // ─── Clients ─────────────────────────────────────────────────────────────

    /// Store a dynamically registered client. Returns its registration access token.
    pub async fn register_client(&self, metadata: ClientMetadata) -> String {
        let registration_access_token = Self::generate_token();
        self.clients.write().await.insert(
            metadata.client_id.clone(),
            RegisteredClient {
                metadata,
                registration_access_token: registration_access_token.clone(),
                created_at: Utc::now(),
            },
        );
        registration_access_token
    }

    /// Look up a dynamically registered client.
    pub async fn get_client(&self, client_id: &str) -> Option<ClientMetadata> {
        self.clients.read().await.get(client_id).map(|c| c.metadata.clone())
    }

    /// Look up a registered client, checking its registration access token.
    pub async fn get_client_for_management(
        &self,
        client_id: &str,
        registration_access_token: &str,
    ) -> Option<ClientMetadata> {
        use subtle::ConstantTimeEq;

        let clients = self.clients.read().await;
        let client = clients.get(client_id)?;
        let matches: bool = client
            .registration_access_token
            .as_bytes()
            .ct_eq(registration_access_token.as_bytes())
            .into();
        matches.then(|| client.metadata.clone())
    }

    // ─── Interactions ────────────────────────────────────────────────────────

    pub async fn insert_interaction(&self, interaction: Interaction) {
        self.interactions.write().await.insert(interaction.uid.clone(), interaction);
    }

    /// Read a live interaction.
    pub async fn get_interaction(&self, uid: &str) -> Option<Interaction> {
        let interactions = self.interactions.read().await;
        interactions
            .get(uid)
            .filter(|i| !is_expired(i.created_at, self.ttl.interaction))
            .cloned()
    }

    /// Remove and return a live interaction (one-time use).
    pub async fn take_interaction(&self, uid: &str) -> Option<Interaction> {
        let interaction = self.interactions.write().await.remove(uid)?;
        (!is_expired(interaction.created_at, self.ttl.interaction)).then_some(interaction)
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    /// Start a browser session for `account_id`. Returns the session id.
    pub async fn create_session(&self, account_id: &str) -> String {
        let session_id = Self::generate_token();
        self.sessions.write().await.insert(
            session_id.clone(),
            BrowserSession { account_id: account_id.to_owned(), created_at: Utc::now() },
        );
        session_id
    }

    pub async fn get_session(&self, session_id: &str) -> Option<BrowserSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .filter(|s| !is_expired(s.created_at, self.ttl.session))
            .cloned()
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    // ─── Grants ──────────────────────────────────────────────────────────────

    /// Scopes `account_id` has consented to for `client_id`.
    pub async fn granted_scopes(&self, account_id: &str, client_id: &str) -> Vec<String> {
        let grants = self.grants.read().await;
        grants
            .get(&(account_id.to_owned(), client_id.to_owned()))
            .filter(|g| !is_expired(g.updated_at, self.ttl.grant))
            .map(|g| g.scopes.clone())
            .unwrap_or_default()
    }

    /// Add `scopes` to the account's grant for the client (cumulative).
    pub async fn grant_scopes(&self, account_id: &str, client_id: &str, scopes: &[String]) {
        let mut grants = self.grants.write().await;
        let grant = grants
            .entry((account_id.to_owned(), client_id.to_owned()))
            .or_insert_with(|| Grant { scopes: Vec::new(), updated_at: Utc::now() });

        if is_expired(grant.updated_at, self.ttl.grant) {
            grant.scopes.clear();
        }
        for scope in scopes {
            if !grant.scopes.contains(scope) {
                grant.scopes.push(scope.clone());
            }
        }
        grant.updated_at = Utc::now();
    }

    // ─── Authorization codes ─────────────────────────────────────────────────

    /// Create an authorization code for a completed authorization request.
    pub async fn create_auth_code(
        &self,
        client_id: String,
        account_id: String,
        redirect_uri: String,
        code_challenge: String,
        scope: String,
    ) -> String {
        let code = Self::generate_token();

        self.auth_codes.write().await.insert(
            code.clone(),
            AuthCode {
                client_id,
                account_id,
                redirect_uri,
                code_challenge,
                scope,
                created_at: Utc::now(),
                used: false,
            },
        );

        code
    }

    /// Consume an authorization code (one-time use).
    ///
    /// Returns the code details if valid, unused, and not expired.
    pub async fn consume_auth_code(&self, code: &str) -> Option<AuthCodeInfo> {
        let mut codes = self.auth_codes.write().await;
        let auth_code = codes.get_mut(code)?;

        if auth_code.used || is_expired(auth_code.created_at, self.ttl.authorization_code) {
            return None;
        }

        auth_code.used = true;

        Some(AuthCodeInfo {
            client_id: auth_code.client_id.clone(),
            account_id: auth_code.account_id.clone(),
            redirect_uri: auth_code.redirect_uri.clone(),
            code_challenge: auth_code.code_challenge.clone(),
            scope: auth_code.scope.clone(),
        })
    }

    // ─── Tokens ──────────────────────────────────────────────────────────────

    /// Issue an access token for an end user, plus a refresh token when requested.
    pub async fn create_token_pair(
        &self,
        client_id: &str,
        account_id: &str,
        scope: &str,
        with_refresh: bool,
    ) -> TokenPair {
        let access = Self::generate_token();

        self.access_tokens.write().await.insert(
            access.clone(),
            AccessToken {
                client_id: client_id.to_owned(),
                account_id: Some(account_id.to_owned()),
                scope: scope.to_owned(),
                created_at: Utc::now(),
                expires_in: self.ttl.access_token,
            },
        );

        let refresh = if with_refresh {
            let refresh = Self::generate_token();
            self.refresh_tokens.write().await.insert(
                refresh.clone(),
                RefreshToken {
                    client_id: client_id.to_owned(),
                    account_id: account_id.to_owned(),
                    access_token: access.clone(),
                    scope: scope.to_owned(),
                    created_at: Utc::now(),
                    expires_in: self.ttl.refresh_token,
                },
            );
            Some(refresh)
        } else {
            None
        };

        TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.ttl.access_token,
            scope: scope.to_owned(),
        }
    }

    /// Issue a client credentials access token (no subject, no refresh token).
    pub async fn create_client_token(&self, client_id: &str, scope: &str) -> TokenPair {
        let access = Self::generate_token();
        self.access_tokens.write().await.insert(
            access.clone(),
            AccessToken {
                client_id: client_id.to_owned(),
                account_id: None,
                scope: scope.to_owned(),
                created_at: Utc::now(),
                expires_in: self.ttl.client_credentials,
            },
        );

        TokenPair {
            access_token: access,
            refresh_token: None,
            expires_in: self.ttl.client_credentials,
            scope: scope.to_owned(),
        }
    }

    /// Look up a live access token.
    pub async fn access_token_info(&self, token: &str) -> Option<TokenInfo> {
        let tokens = self.access_tokens.read().await;
        let access = tokens.get(token)?;
        if access.is_expired() {
            return None;
        }
        Some(TokenInfo {
            client_id: access.client_id.clone(),
            account_id: access.account_id.clone(),
            scope: access.scope.clone(),
            issued_at: access.created_at.timestamp(),
            expires_at: access.expires_at(),
            kind: TokenKind::AccessToken,
        })
    }

    /// Look up a live refresh token.
    pub async fn refresh_token_info(&self, token: &str) -> Option<TokenInfo> {
        let tokens = self.refresh_tokens.read().await;
        let refresh = tokens.get(token)?;
        if refresh.is_expired() {
            return None;
        }
        Some(TokenInfo {
            client_id: refresh.client_id.clone(),
            account_id: Some(refresh.account_id.clone()),
            scope: refresh.scope.clone(),
            issued_at: refresh.created_at.timestamp(),
            expires_at: refresh.expires_at(),
            kind: TokenKind::RefreshToken,
        })
    }

    /// Rotate a refresh token owned by `client_id`: invalidate old tokens and issue new ones.
    pub async fn refresh_token_pair(&self, refresh_token: &str, client_id: &str) -> Option<TokenPair> {
        let old = {
            let mut tokens = self.refresh_tokens.write().await;
            if tokens.get(refresh_token)?.client_id != client_id {
                return None;
            }
            tokens.remove(refresh_token)?
        };

        if old.is_expired() {
            return None;
        }

        self.access_tokens.write().await.remove(&old.access_token);

        Some(self.create_token_pair(&old.client_id, &old.account_id, &old.scope, true).await)
    }

    /// Revoke an access or refresh token owned by `client_id`. Returns whether anything was removed.
    pub async fn revoke(&self, token: &str, client_id: &str) -> bool {
        {
            let mut tokens = self.access_tokens.write().await;
            if tokens.get(token).is_some_and(|t| t.client_id == client_id) {
                tokens.remove(token);
                return true;
            }
        }

        let removed = {
            let mut tokens = self.refresh_tokens.write().await;
            match tokens.get(token) {
                Some(t) if t.client_id == client_id => tokens.remove(token),
                _ => None,
            }
        };

        match removed {
            Some(refresh) => {
                self.access_tokens.write().await.remove(&refresh.access_token);
                true
            }
            None => false,
        }
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Start background cleanup task for expired records.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    pub async fn cleanup_expired(&self) {
        let ttl = self.ttl;

        self.interactions.write().await.retain(|_, i| !is_expired(i.created_at, ttl.interaction));
        self.sessions.write().await.retain(|_, s| !is_expired(s.created_at, ttl.session));
        self.grants.write().await.retain(|_, g| !is_expired(g.updated_at, ttl.grant));
        self.auth_codes
            .write()
            .await
            .retain(|_, c| !is_expired(c.created_at, ttl.authorization_code));

        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired access tokens");
            }
        }

        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired refresh tokens");
            }
        }
    }
}

impl Default for ProviderStore {
    fn default() -> Self {
        Self::new(TtlConfig::default())
    }
}

impl std::fmt::Debug for ProviderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStore").finish()
    }
}

/// Subset of auth code info returned from consume.
#[derive(Debug, Clone)]
pub struct AuthCodeInfo {
    pub client_id: String,
    pub account_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
}

/// Tokens returned from issuance or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub scope: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

/// Live token details for introspection and userinfo.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub client_id: String,
    pub account_id: Option<String>,
    pub scope: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub kind: TokenKind,
}
