//! Account store abstraction and the components built on it.
//!
//! A store answers two lookups, by login id and by subject id. Backends differ
//! only in storage medium:
//! - [`MemoryAccountStore`]: in-process table seeded at startup
//! - [`RemoteAccountStore`]: networked document service over HTTP
//!
//! The active backend is chosen once at startup and passed explicitly to the
//! [`Authenticator`] and [`AccountResolver`].

pub mod authenticator;
pub mod credential;
pub mod memory;
pub mod remote;
pub mod resolver;

pub use authenticator::Authenticator;
pub use credential::CredentialVerifier;
pub use memory::MemoryAccountStore;
pub use remote::RemoteAccountStore;
pub use resolver::{AccountResolver, Identity, claims};

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AccountStoreKind, Config};
use crate::error::StoreResult;

/// A stored account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Stable subject identifier.
    pub id: String,

    /// Identifier the end user types at the login screen.
    pub login_id: String,

    /// Verifier material: an Argon2 PHC string, or plain material in development stores.
    #[serde(alias = "loginPassword")]
    pub credential_secret: String,
}

impl AccountRecord {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        login_id: impl Into<String>,
        credential_secret: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), login_id: login_id.into(), credential_secret: credential_secret.into() }
    }
}

impl Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("id", &self.id)
            .field("login_id", &self.login_id)
            .finish()
    }
}

/// Lookup interface shared by all account store backends.
///
/// Lookups are exact, case-sensitive and side-effect free. A missing account is
/// `Ok(None)`; `Err` is reserved for backend failures.
#[async_trait]
pub trait AccountStore: Send + Sync + Debug {
    /// Find the account whose login id equals `login_id`.
    async fn find_by_login_id(&self, login_id: &str) -> StoreResult<Option<AccountRecord>>;

    /// Find the account whose subject id equals `id`.
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<AccountRecord>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Build the configured account store.
///
/// # Errors
///
/// Returns error if the seed file cannot be loaded or the remote client cannot be built.
pub async fn build_account_store(
    config: &Config,
    verifier: &CredentialVerifier,
) -> anyhow::Result<Arc<dyn AccountStore>> {
    let store: Arc<dyn AccountStore> = match config.account_store {
        AccountStoreKind::Memory => match config.accounts_file {
            Some(ref path) => Arc::new(MemoryAccountStore::load_file(path, verifier).await?),
            None => {
                let verifier = verifier.clone();
                Arc::new(
                    tokio::task::spawn_blocking(move || MemoryAccountStore::with_default_account(&verifier))
                        .await??,
                )
            }
        },
        AccountStoreKind::Remote => Arc::new(RemoteAccountStore::new(&config.remote_store)?),
    };

    tracing::info!(backend = store.name(), "Account store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_debug_hides_secret() {
        let record = AccountRecord::new("u1", "test", "hunter2");
        let debug = format!("{record:?}");
        assert!(debug.contains("u1"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_record_accepts_legacy_password_field() {
        let record: AccountRecord =
            serde_json::from_str(r#"{"id":"u1","loginId":"test","loginPassword":"pw"}"#).unwrap();
        assert_eq!(record.credential_secret, "pw");
        assert_eq!(record.login_id, "test");
    }
}
