//! Client metadata and the static client list.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::claims::SUPPORTED_SCOPES;

/// Registered relying-party metadata.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    /// Space-delimited scopes the client may request; unrestricted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string()]
}

fn default_auth_method() -> String {
    "client_secret_basic".to_string()
}

impl ClientMetadata {
    /// Name shown on interaction screens.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(&self.client_id)
    }

    #[must_use]
    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    #[must_use]
    pub fn allows_response_type(&self, response_type: &str) -> bool {
        self.response_types.iter().any(|r| r == response_type)
    }

    /// Exact string match against registered redirect URIs.
    #[must_use]
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    /// Whether every scope in `scopes` is supported and allowed for this client.
    #[must_use]
    pub fn allows_scopes(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|scope| {
            SUPPORTED_SCOPES.contains(&scope.as_str())
                && self
                    .scope
                    .as_deref()
                    .is_none_or(|allowed| allowed.split_whitespace().any(|a| a == scope))
        })
    }

    /// Whether the client must authenticate at the token endpoint.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.token_endpoint_auth_method != "none"
    }

    /// Constant-time comparison against the registered secret.
    #[must_use]
    pub fn verify_secret(&self, presented: &str) -> bool {
        self.client_secret
            .as_deref()
            .is_some_and(|secret| bool::from(secret.as_bytes().ct_eq(presented.as_bytes())))
    }
}

impl std::fmt::Debug for ClientMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetadata")
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_types", &self.grant_types)
            .finish()
    }
}

/// Clients available when no clients file is configured.
#[must_use]
pub fn default_clients() -> Vec<ClientMetadata> {
    vec![
        // Authorization code flow
        ClientMetadata {
            client_id: "auth_test".into(),
            client_secret: Some("123".into()),
            client_name: None,
            redirect_uris: vec!["http://localhost:3001/auth".into()],
            response_types: vec!["code".into()],
            grant_types: vec!["refresh_token".into(), "authorization_code".into()],
            scope: Some("openid".into()),
            token_endpoint_auth_method: "client_secret_basic".into(),
            post_logout_redirect_uris: vec!["http://localhost:3001/".into()],
        },
        // Client credentials flow
        ClientMetadata {
            client_id: "test".into(),
            client_secret: Some("test".into()),
            client_name: None,
            redirect_uris: vec![],
            response_types: vec![],
            grant_types: vec!["client_credentials".into()],
            scope: None,
            token_endpoint_auth_method: "client_secret_basic".into(),
            post_logout_redirect_uris: vec![],
        },
    ]
}

/// Static clients indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientMetadata>,
}

impl ClientRegistry {
    /// Index `clients`, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns error when two clients share an id.
    pub fn new(clients: impl IntoIterator<Item = ClientMetadata>) -> anyhow::Result<Self> {
        let mut map = HashMap::new();
        for client in clients {
            let id = client.client_id.clone();
            if map.insert(id.clone(), client).is_some() {
                anyhow::bail!("duplicate client_id '{id}'");
            }
        }
        Ok(Self { clients: map })
    }

    /// Load clients from a JSON array file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub async fn load_file(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let clients: Vec<ClientMetadata> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), count = clients.len(), "Loaded static clients");
        Self::new(clients)
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&ClientMetadata> {
        self.clients.get(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
