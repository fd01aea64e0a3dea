//! The interaction state machine.
//!
//! Each request is driven by the prompt the engine reports for the uid; the
//! controller keeps no state of its own between requests.

use std::sync::Arc;

use serde::Deserialize;

use super::views::View;
use crate::account::{AccountResolver, Authenticator};
use crate::config::claims::SCOPE_CLAIMS;
use crate::error::{AppError, EngineError};
use crate::provider::{
    InteractionSession, ProtocolEngine, Prompt, ResumeOptions, ResumeResult, Resumption,
};

/// Flash shown when credentials are rejected.
pub const INVALID_CREDENTIALS: &str = "Invalid loginId or password.";

/// Body of `POST /interaction/{uid}/login`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "loginId", default)]
    pub login_id: String,
    #[serde(default)]
    pub password: String,
}

/// What the HTTP layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Show a screen and wait for the next request on the same uid.
    Render(View),
    /// The interaction finished; follow the engine's redirect.
    Resumed(Resumption),
}

/// Drives interactions against a protocol engine.
#[derive(Clone)]
pub struct InteractionController {
    engine: Arc<dyn ProtocolEngine>,
    authenticator: Authenticator,
    resolver: AccountResolver,
}

impl InteractionController {
    #[must_use]
    pub fn new(
        engine: Arc<dyn ProtocolEngine>,
        authenticator: Authenticator,
        resolver: AccountResolver,
    ) -> Self {
        Self { engine, authenticator, resolver }
    }

    /// `GET /interaction/{uid}`
    ///
    /// # Errors
    ///
    /// Engine rejections and account store failures.
    pub async fn show(&self, uid: &str) -> Result<Outcome, AppError> {
        let details = self.engine.interaction_details(uid).await?;
        let client_name = self.client_name(&details).await?;
        let InteractionSession { uid, prompt, params, session } = details;

        tracing::debug!(uid = %uid, prompt = prompt.name(), "Showing interaction");

        match prompt {
            Prompt::SelectAccount => {
                let Some(session) = session else {
                    return self.resume(&uid, ResumeResult::SelectAccount {}, ResumeOptions::REPLACE).await;
                };
                match self.resolver.resolve(&session.account_id).await? {
                    Some(identity) => Ok(Outcome::Render(View::SelectAccount {
                        uid,
                        client_name,
                        claims: identity.claims,
                    })),
                    // The session's subject is gone; let the engine ask for a login.
                    None => self.resume(&uid, ResumeResult::SelectAccount {}, ResumeOptions::REPLACE).await,
                }
            }
            Prompt::Login => Ok(Outcome::Render(View::Login {
                uid,
                client_name,
                login_hint: params.login_hint,
                flash: None,
            })),
            Prompt::Consent { missing_scopes } => {
                let scopes = params.scopes();
                let claims = claim_names(&scopes);
                Ok(Outcome::Render(View::Consent { uid, client_name, scopes, missing_scopes, claims }))
            }
            // Engine-defined prompts are shown but never resolved here.
            Prompt::Custom { name, details } => Ok(Outcome::Render(View::Interaction {
                uid,
                client_name,
                prompt: name,
                details,
            })),
        }
    }

    /// `POST /interaction/{uid}/login`
    ///
    /// Rejected credentials re-render the login view and leave the interaction pending.
    ///
    /// # Errors
    ///
    /// Engine rejections.
    pub async fn submit_login(&self, uid: &str, form: LoginForm) -> Result<Outcome, AppError> {
        let details = self.engine.interaction_details(uid).await?;

        let Some(account) = self.authenticator.authenticate(&form.login_id, &form.password).await else {
            tracing::info!(uid = %uid, "Login rejected");
            let client_name = self.client_name(&details).await?;
            return Ok(Outcome::Render(View::Login {
                uid: details.uid,
                client_name,
                login_hint: Some(form.login_id),
                flash: Some(INVALID_CREDENTIALS.to_string()),
            }));
        };

        tracing::info!(uid = %uid, account = %account, "Login accepted");
        self.resume(uid, ResumeResult::Login { account }, ResumeOptions::REPLACE).await
    }

    /// `POST /interaction/{uid}/confirm`
    ///
    /// # Errors
    ///
    /// Engine rejections.
    pub async fn confirm(&self, uid: &str) -> Result<Outcome, AppError> {
        self.resume(uid, ResumeResult::Consent {}, ResumeOptions::MERGE).await
    }

    /// `GET /interaction/{uid}/abort`
    ///
    /// # Errors
    ///
    /// Engine rejections.
    pub async fn abort(&self, uid: &str) -> Result<Outcome, AppError> {
        tracing::info!(uid = %uid, "Interaction aborted by end user");
        self.resume(uid, ResumeResult::aborted(), ResumeOptions::REPLACE).await
    }

    async fn resume(
        &self,
        uid: &str,
        result: ResumeResult,
        options: ResumeOptions,
    ) -> Result<Outcome, AppError> {
        let resumption = self.engine.resume_interaction(uid, result, options).await?;
        Ok(Outcome::Resumed(resumption))
    }

    async fn client_name(&self, details: &InteractionSession) -> Result<String, EngineError> {
        let client_id = &details.params.client_id;
        self.engine
            .find_client(client_id)
            .await
            .map(|c| c.display_name().to_string())
            .ok_or_else(|| EngineError::UnknownClient(client_id.clone()))
    }
}

impl std::fmt::Debug for InteractionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionController")
            .field("authenticator", &self.authenticator)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Claim names released under `scopes`.
fn claim_names(scopes: &[String]) -> Vec<String> {
    SCOPE_CLAIMS
        .iter()
        .filter(|(scope, _)| scopes.iter().any(|s| s == scope))
        .flat_map(|(_, claims)| claims.iter().map(|c| (*c).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::account::{AccountRecord, AccountStore, CredentialVerifier};
    use crate::config::HashingConfig;
    use crate::error::{EngineResult, StoreResult};
    use crate::provider::{AuthorizationParams, ClientMetadata, PriorSession, SessionChange};

    /// Engine double that records every resume.
    struct RecordingEngine {
        session: Mutex<Option<InteractionSession>>,
        resumes: Mutex<Vec<(String, ResumeResult, ResumeOptions)>>,
    }

    impl RecordingEngine {
        fn with(prompt: Prompt, session: Option<PriorSession>) -> Arc<Self> {
            Arc::new(Self {
                session: Mutex::new(Some(InteractionSession {
                    uid: "uid1".into(),
                    prompt,
                    params: AuthorizationParams {
                        client_id: "auth_test".into(),
                        redirect_uri: "http://localhost:3001/auth".into(),
                        response_type: "code".into(),
                        scope: "openid profile".into(),
                        state: None,
                        code_challenge: "c".into(),
                        code_challenge_method: "S256".into(),
                        prompt: None,
                        login_hint: Some("hint".into()),
                    },
                    session,
                })),
                resumes: Mutex::new(Vec::new()),
            })
        }

        fn resumes(&self) -> Vec<(String, ResumeResult, ResumeOptions)> {
            self.resumes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolEngine for RecordingEngine {
        async fn interaction_details(&self, uid: &str) -> EngineResult<InteractionSession> {
            self.session
                .lock()
                .unwrap()
                .clone()
                .filter(|s| s.uid == uid)
                .ok_or_else(|| EngineError::InteractionNotFound(uid.into()))
        }

        async fn resume_interaction(
            &self,
            uid: &str,
            result: ResumeResult,
            options: ResumeOptions,
        ) -> EngineResult<Resumption> {
            let mut session = self.session.lock().unwrap();
            if !session.as_ref().is_some_and(|s| s.uid == uid) {
                return Err(EngineError::InteractionNotFound(uid.into()));
            }
            session.take();
            drop(session);
            self.resumes.lock().unwrap().push((uid.into(), result, options));
            Ok(Resumption { location: "/auth/resume".into(), session: SessionChange::Keep })
        }

        async fn find_client(&self, client_id: &str) -> Option<ClientMetadata> {
            crate::provider::clients::default_clients()
                .into_iter()
                .find(|c| c.client_id == client_id)
        }
    }

    /// Store double that counts lookups.
    #[derive(Debug, Default)]
    struct CountingStore {
        by_id: AtomicUsize,
        record: Option<AccountRecord>,
    }

    #[async_trait]
    impl AccountStore for CountingStore {
        async fn find_by_login_id(&self, login_id: &str) -> StoreResult<Option<AccountRecord>> {
            Ok(self.record.clone().filter(|r| r.login_id == login_id))
        }

        async fn find_by_id(&self, id: &str) -> StoreResult<Option<AccountRecord>> {
            self.by_id.fetch_add(1, Ordering::SeqCst);
            Ok(self.record.clone().filter(|r| r.id == id))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn controller(engine: Arc<RecordingEngine>, store: Arc<CountingStore>) -> InteractionController {
        let verifier = CredentialVerifier::new(&HashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let store: Arc<dyn AccountStore> = store;
        InteractionController::new(
            engine,
            Authenticator::new(Arc::clone(&store), verifier),
            AccountResolver::new(store),
        )
    }

    fn test_store() -> Arc<CountingStore> {
        Arc::new(CountingStore {
            by_id: AtomicUsize::new(0),
            record: Some(AccountRecord::new("u1", "test", "test")),
        })
    }

    #[tokio::test]
    async fn test_login_success_resumes_with_account() {
        let engine = RecordingEngine::with(Prompt::Login, None);
        let ctl = controller(Arc::clone(&engine), test_store());

        let form = LoginForm { login_id: "test".into(), password: "test".into() };
        let outcome = ctl.submit_login("uid1", form).await.unwrap();

        assert!(matches!(outcome, Outcome::Resumed(_)));
        assert_eq!(
            engine.resumes(),
            vec![("uid1".into(), ResumeResult::Login { account: "u1".into() }, ResumeOptions::REPLACE)]
        );
    }

    #[tokio::test]
    async fn test_wrong_password_rerenders_without_resume() {
        let engine = RecordingEngine::with(Prompt::Login, None);
        let ctl = controller(Arc::clone(&engine), test_store());

        let form = LoginForm { login_id: "test".into(), password: "wrong".into() };
        let outcome = ctl.submit_login("uid1", form).await.unwrap();

        let Outcome::Render(View::Login { flash, login_hint, uid, .. }) = outcome else {
            panic!("expected login view");
        };
        assert_eq!(flash.as_deref(), Some(INVALID_CREDENTIALS));
        assert_eq!(login_hint.as_deref(), Some("test"));
        assert_eq!(uid, "uid1");
        assert!(engine.resumes().is_empty());
    }

    #[tokio::test]
    async fn test_select_account_without_session_skips_resolver() {
        let engine = RecordingEngine::with(Prompt::SelectAccount, None);
        let store = test_store();
        let ctl = controller(Arc::clone(&engine), Arc::clone(&store));

        let outcome = ctl.show("uid1").await.unwrap();

        assert!(matches!(outcome, Outcome::Resumed(_)));
        assert_eq!(store.by_id.load(Ordering::SeqCst), 0);
        assert_eq!(engine.resumes()[0].1, ResumeResult::SelectAccount {});
        assert_eq!(engine.resumes()[0].2, ResumeOptions::REPLACE);
    }

    #[tokio::test]
    async fn test_select_account_with_session_renders_claims() {
        let session = PriorSession { account_id: "u1".into(), authenticated_at: 0 };
        let engine = RecordingEngine::with(Prompt::SelectAccount, Some(session));
        let ctl = controller(Arc::clone(&engine), test_store());

        let Outcome::Render(View::SelectAccount { claims, .. }) = ctl.show("uid1").await.unwrap() else {
            panic!("expected select_account view");
        };
        assert_eq!(claims["sub"], "u1");
        assert_eq!(claims["loginId"], "test");
        assert!(engine.resumes().is_empty());
    }

    #[tokio::test]
    async fn test_select_account_with_vanished_subject_resumes() {
        let session = PriorSession { account_id: "gone".into(), authenticated_at: 0 };
        let engine = RecordingEngine::with(Prompt::SelectAccount, Some(session));
        let ctl = controller(Arc::clone(&engine), test_store());

        assert!(matches!(ctl.show("uid1").await.unwrap(), Outcome::Resumed(_)));
        assert_eq!(engine.resumes()[0].1, ResumeResult::SelectAccount {});
    }

    #[tokio::test]
    async fn test_login_prompt_prefills_hint() {
        let engine = RecordingEngine::with(Prompt::Login, None);
        let ctl = controller(engine, test_store());

        let Outcome::Render(View::Login { login_hint, flash, client_name, .. }) =
            ctl.show("uid1").await.unwrap()
        else {
            panic!("expected login view");
        };
        assert_eq!(login_hint.as_deref(), Some("hint"));
        assert!(flash.is_none());
        assert_eq!(client_name, "auth_test");
    }

    #[tokio::test]
    async fn test_consent_view_lists_claims() {
        let engine = RecordingEngine::with(Prompt::Consent { missing_scopes: vec!["profile".into()] }, None);
        let ctl = controller(engine, test_store());

        let Outcome::Render(View::Consent { scopes, claims, missing_scopes, .. }) =
            ctl.show("uid1").await.unwrap()
        else {
            panic!("expected consent view");
        };
        assert_eq!(scopes, vec!["openid", "profile"]);
        assert_eq!(claims, vec!["sub", "loginId"]);
        assert_eq!(missing_scopes, vec!["profile"]);
    }

    #[tokio::test]
    async fn test_custom_prompt_renders_generic_view() {
        let prompt = Prompt::Custom { name: "mfa".into(), details: serde_json::json!({"factor": "otp"}) };
        let engine = RecordingEngine::with(prompt, None);
        let ctl = controller(Arc::clone(&engine), test_store());

        let outcome = ctl.show("uid1").await.unwrap();
        assert!(matches!(outcome, Outcome::Render(View::Interaction { ref prompt, .. }) if prompt == "mfa"));
        assert!(engine.resumes().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_merges() {
        let engine = RecordingEngine::with(Prompt::Consent { missing_scopes: vec![] }, None);
        let ctl = controller(Arc::clone(&engine), test_store());

        ctl.confirm("uid1").await.unwrap();
        assert_eq!(engine.resumes()[0].1, ResumeResult::Consent {});
        assert_eq!(engine.resumes()[0].2, ResumeOptions::MERGE);
    }

    #[tokio::test]
    async fn test_abort_shape_for_any_prompt() {
        for prompt in [Prompt::Login, Prompt::SelectAccount, Prompt::Consent { missing_scopes: vec![] }] {
            let engine = RecordingEngine::with(prompt, None);
            let ctl = controller(Arc::clone(&engine), test_store());

            ctl.abort("uid1").await.unwrap();
            assert_eq!(
                engine.resumes()[0].1,
                ResumeResult::Error {
                    error: "access_denied".into(),
                    error_description: "End-User aborted interaction".into(),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_resumed_uid_is_rejected() {
        let engine = RecordingEngine::with(Prompt::Login, None);
        let ctl = controller(Arc::clone(&engine), test_store());

        let form = LoginForm { login_id: "test".into(), password: "test".into() };
        ctl.submit_login("uid1", form).await.unwrap();

        let err = ctl.show("uid1").await.unwrap_err();
        assert!(matches!(err, AppError::Engine(EngineError::InteractionNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_uid_is_engine_error() {
        let engine = RecordingEngine::with(Prompt::Login, None);
        let ctl = controller(engine, test_store());

        let err = ctl.confirm("nope").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
