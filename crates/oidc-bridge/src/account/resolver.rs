//! Turns stored accounts into claims-bearing identities.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::AccountStore;
use crate::config::claims::SCOPE_CLAIMS;
use crate::error::StoreResult;

/// An authenticated subject with its full claim set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject_id: String,
    pub claims: Map<String, Value>,
}

/// Claims of `identity` visible under `scope` (space-delimited).
///
/// Unknown scopes contribute nothing. The result is ordered by claim name.
#[must_use]
pub fn claims(identity: &Identity, scope: &str) -> Map<String, Value> {
    let mut visible = Map::new();
    for requested in scope.split_whitespace() {
        let Some((_, names)) = SCOPE_CLAIMS.iter().find(|(s, _)| *s == requested) else {
            continue;
        };
        for name in *names {
            if let Some(value) = identity.claims.get(*name) {
                visible.insert((*name).to_string(), value.clone());
            }
        }
    }
    visible
}

/// Resolves subject ids to identities.
#[derive(Clone, Debug)]
pub struct AccountResolver {
    store: Arc<dyn AccountStore>,
}

impl AccountResolver {
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Look up `subject_id`. `Ok(None)` means the subject no longer exists.
    pub async fn resolve(&self, subject_id: &str) -> StoreResult<Option<Identity>> {
        let Some(record) = self.store.find_by_id(subject_id).await? else {
            tracing::debug!(subject = %subject_id, "Subject not found");
            return Ok(None);
        };

        let mut claims = Map::new();
        claims.insert("sub".into(), Value::String(record.id.clone()));
        claims.insert("loginId".into(), Value::String(record.login_id));

        Ok(Some(Identity { subject_id: record.id, claims }))
    }
}
