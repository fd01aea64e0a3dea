//! In-memory account store.
//!
//! Records are loaded once at startup and never change afterwards, so the
//! tables need no locking.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::{AccountRecord, AccountStore, CredentialVerifier};
use crate::error::{StoreError, StoreResult};

/// Subject id of the account seeded when no seed file is configured.
pub const DEFAULT_ACCOUNT_ID: &str = "23121d3c-84df-44ac-b458-3d63a9a05497";

/// Login id (and password) of the default account.
pub const DEFAULT_LOGIN_ID: &str = "test";

/// In-process account table.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    by_id: HashMap<String, AccountRecord>,
    /// Login id -> subject id.
    by_login_id: HashMap<String, String>,
}

impl MemoryAccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, rejecting duplicate ids and login ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] on a uniqueness violation.
    pub fn from_records(records: impl IntoIterator<Item = AccountRecord>) -> StoreResult<Self> {
        let mut store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    /// Build a store holding the default development account (password hashed).
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn with_default_account(verifier: &CredentialVerifier) -> StoreResult<Self> {
        let secret = verifier.hash(DEFAULT_LOGIN_ID)?;
        Self::from_records([AccountRecord::new(DEFAULT_ACCOUNT_ID, DEFAULT_LOGIN_ID, secret)])
    }

    /// Load records from a JSON array file.
    ///
    /// Plain secrets in the file are hashed on load so only PHC strings stay in memory.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or records collide.
    pub async fn load_file(path: &Path, verifier: &CredentialVerifier) -> StoreResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let records: Vec<AccountRecord> = serde_json::from_str(&raw)?;

        let verifier = verifier.clone();
        let records = tokio::task::spawn_blocking(move || {
            records
                .into_iter()
                .map(|mut record| {
                    if !record.credential_secret.starts_with("$argon2") {
                        record.credential_secret = verifier.hash(&record.credential_secret)?;
                    }
                    Ok(record)
                })
                .collect::<StoreResult<Vec<_>>>()
        })
        .await
        .map_err(|e| StoreError::Hash(e.to_string()))??;

        tracing::info!(path = %path.display(), count = records.len(), "Loaded account seed file");
        Self::from_records(records)
    }

    /// Number of accounts held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the store holds no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn insert(&mut self, record: AccountRecord) -> StoreResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(StoreError::Duplicate { field: "id", value: record.id });
        }
        if self.by_login_id.contains_key(&record.login_id) {
            return Err(StoreError::Duplicate { field: "loginId", value: record.login_id });
        }

        self.by_login_id.insert(record.login_id.clone(), record.id.clone());
        self.by_id.insert(record.id.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_login_id(&self, login_id: &str) -> StoreResult<Option<AccountRecord>> {
        Ok(self.by_login_id.get(login_id).and_then(|id| self.by_id.get(id)).cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<AccountRecord>> {
        Ok(self.by_id.get(id).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
