//! OpenID Connect protocol engine.
//!
//! The interaction screens talk to the engine only through [`ProtocolEngine`].
//! [`EmbeddedProvider`] is the in-process implementation serving:
//! - OpenID Connect Discovery 1.0
//! - RFC 6749: Authorization Code, Refresh Token and Client Credentials grants
//! - RFC 7636: PKCE (S256, required)
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 7591 / 7592: Dynamic Client Registration and read-back

pub mod clients;
pub mod embedded;
pub mod handlers;
pub mod pkce;
pub mod store;
mod types;

pub use clients::ClientMetadata;
pub use embedded::EmbeddedProvider;
pub use store::ProviderStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// The human input the engine needs before it can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Confirm or switch the signed-in account.
    SelectAccount,
    /// Collect credentials.
    Login,
    /// Approve the requested scopes.
    Consent {
        /// Requested scopes not yet covered by a grant.
        missing_scopes: Vec<String>,
    },
    /// Any engine-defined prompt the screens do not handle specifically.
    Custom {
        name: String,
        details: serde_json::Value,
    },
}

impl Prompt {
    /// Wire name of the prompt.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::SelectAccount => "select_account",
            Self::Login => "login",
            Self::Consent { .. } => "consent",
            Self::Custom { name, .. } => name,
        }
    }
}

/// Authorization request parameters carried by an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
}

impl AuthorizationParams {
    /// Requested scopes, de-duplicated, in request order.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.scope.split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// Whether the `prompt` parameter lists `value`.
    #[must_use]
    pub fn prompts(&self, value: &str) -> bool {
        self.prompt.as_deref().is_some_and(|p| p.split_whitespace().any(|v| v == value))
    }
}

/// A previously authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorSession {
    pub account_id: String,
    /// Unix time of the login that created the session.
    pub authenticated_at: i64,
}

/// A pending authorization that needs human input.
#[derive(Debug, Clone)]
pub struct InteractionSession {
    pub uid: String,
    pub prompt: Prompt,
    pub params: AuthorizationParams,
    pub session: Option<PriorSession>,
}

/// Outcome of one interaction step, reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeResult {
    Login { account: String },
    Consent {},
    SelectAccount {},
    Error { error: String, error_description: String },
}

impl ResumeResult {
    /// The end user cancelled the interaction.
    #[must_use]
    pub fn aborted() -> Self {
        Self::Error {
            error: "access_denied".to_string(),
            error_description: "End-User aborted interaction".to_string(),
        }
    }
}

/// How a resume combines with earlier results of the same authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeOptions {
    pub merge_with_last_submission: bool,
}

impl ResumeOptions {
    /// Replace any earlier submission.
    pub const REPLACE: Self = Self { merge_with_last_submission: false };

    /// Combine with the earlier submission.
    pub const MERGE: Self = Self { merge_with_last_submission: true };
}

/// What the browser session cookie should become after a resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Keep,
    Set(String),
    Clear,
}

/// Engine reply to a resume: where to send the browser next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resumption {
    pub location: String,
    pub session: SessionChange,
}

/// Operations the interaction screens need from the protocol engine.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Fetch the pending interaction. Fails for unknown, expired or resumed uids.
    async fn interaction_details(&self, uid: &str) -> EngineResult<InteractionSession>;

    /// Finish the interaction with `result`. The uid is invalid afterwards.
    async fn resume_interaction(
        &self,
        uid: &str,
        result: ResumeResult,
        options: ResumeOptions,
    ) -> EngineResult<Resumption>;

    /// Look up a client's metadata.
    async fn find_client(&self, client_id: &str) -> Option<ClientMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_result_wire_shape() {
        let login = serde_json::to_value(ResumeResult::Login { account: "u1".into() }).unwrap();
        assert_eq!(login, serde_json::json!({"login": {"account": "u1"}}));

        let consent = serde_json::to_value(ResumeResult::Consent {}).unwrap();
        assert_eq!(consent, serde_json::json!({"consent": {}}));

        let select = serde_json::to_value(ResumeResult::SelectAccount {}).unwrap();
        assert_eq!(select, serde_json::json!({"select_account": {}}));
    }

    #[test]
    fn test_aborted_result() {
        assert_eq!(
            ResumeResult::aborted(),
            ResumeResult::Error {
                error: "access_denied".into(),
                error_description: "End-User aborted interaction".into(),
            }
        );
    }

    #[test]
    fn test_scopes_and_prompts() {
        let params = AuthorizationParams {
            client_id: "c".into(),
            redirect_uri: "http://localhost/cb".into(),
            response_type: "code".into(),
            scope: "openid profile openid".into(),
            state: None,
            code_challenge: "x".into(),
            code_challenge_method: "S256".into(),
            prompt: Some("login consent".into()),
            login_hint: None,
        };
        assert_eq!(params.scopes(), vec!["openid", "profile"]);
        assert!(params.prompts("consent"));
        assert!(!params.prompts("select_account"));
        assert_eq!(Prompt::Consent { missing_scopes: vec![] }.name(), "consent");
    }
}
