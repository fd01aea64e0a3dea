//! Credential checking against the account store.

use std::sync::Arc;

use super::{AccountStore, CredentialVerifier};

/// Validates login credentials and yields the subject id.
#[derive(Clone, Debug)]
pub struct Authenticator {
    store: Arc<dyn AccountStore>,
    verifier: CredentialVerifier,
}

impl Authenticator {
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, verifier: CredentialVerifier) -> Self {
        Self { store, verifier }
    }

    /// Authenticate a login attempt.
    ///
    /// Returns the account's subject id on success. Unknown login id, wrong
    /// secret and store failure all return `None` after the same amount of
    /// hashing work.
    pub async fn authenticate(&self, login_id: &str, presented_secret: &str) -> Option<String> {
        let record = match self.store.find_by_login_id(login_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(backend = self.store.name(), error = %e, "Account lookup failed during login");
                None
            }
        };

        // Argon2 runs on the blocking pool so other requests keep making progress.
        let verifier = self.verifier.clone();
        let presented = presented_secret.to_owned();
        let checked = tokio::task::spawn_blocking(move || match record {
            Some(record) => verifier.verify(&record.credential_secret, &presented).then_some(record.id),
            None => {
                verifier.burn(&presented);
                None
            }
        })
        .await;

        match checked {
            Ok(Some(account)) => {
                tracing::info!(account = %account, "Authenticated");
                Some(account)
            }
            Ok(None) => {
                tracing::debug!("Authentication failed");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential verification task failed");
                None
            }
        }
    }
}
