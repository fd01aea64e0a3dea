//! Credential verification.
//!
//! Stored secrets are Argon2id PHC strings. Development stores may hold plain
//! verifier material, which is compared in constant time. Every verification
//! costs exactly one Argon2 computation, whichever branch runs, so timing does
//! not reveal whether an account exists or how its secret is stored.
//!
//! Argon2 is CPU-bound: async callers run [`CredentialVerifier::verify`] and
//! [`CredentialVerifier::burn`] through `tokio::task::spawn_blocking`.

use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;

use crate::config::HashingConfig;
use crate::error::{StoreError, StoreResult};

/// PHC prefix identifying Argon2 hashes.
const ARGON2_PREFIX: &str = "$argon2";

/// Hashes and verifies account secrets.
#[derive(Clone)]
pub struct CredentialVerifier {
    argon2: Argon2<'static>,
    /// Hash of a random value nobody knows; verified against to equalize timing.
    dummy_hash: Arc<str>,
    #[cfg(test)]
    verifications: Arc<AtomicUsize>,
}

impl CredentialVerifier {
    /// Create a verifier with the given Argon2id cost.
    ///
    /// # Errors
    ///
    /// Returns error if the cost parameters are out of range.
    pub fn new(config: &HashingConfig) -> StoreResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| StoreError::Hash(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let unguessable = uuid::Uuid::new_v4().to_string();
        let dummy_hash = hash_with(&argon2, &unguessable)?;

        Ok(Self {
            argon2,
            dummy_hash: Arc::from(dummy_hash),
            #[cfg(test)]
            verifications: Arc::default(),
        })
    }

    /// Hash a secret for storage.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn hash(&self, secret: &str) -> StoreResult<String> {
        hash_with(&self.argon2, secret)
    }

    /// Check `presented` against the stored verifier material.
    #[must_use]
    pub fn verify(&self, stored: &str, presented: &str) -> bool {
        if stored.starts_with(ARGON2_PREFIX) {
            match PasswordHash::new(stored) {
                Ok(parsed) => {
                    if !self.has_local_cost(&parsed) {
                        tracing::warn!(
                            "Stored credential uses different Argon2 parameters than HashingConfig; \
                             login timing may reveal account existence"
                        );
                    }
                    self.argon2_verify(presented, &parsed)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stored credential is not a valid PHC string");
                    self.burn(presented);
                    false
                }
            }
        } else {
            self.burn(presented);
            stored.as_bytes().ct_eq(presented.as_bytes()).into()
        }
    }

    /// Spend one verification's worth of work without a real record.
    pub fn burn(&self, presented: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2_verify(presented, &parsed);
        }
    }

    /// Whether a PHC hash was produced with this verifier's algorithm and cost.
    ///
    /// A hash with a different cost takes a different time to verify than
    /// [`burn`](Self::burn), which would let timing separate known from
    /// unknown logins.
    #[must_use]
    pub fn has_local_cost(&self, parsed: &PasswordHash<'_>) -> bool {
        let local = self.argon2.params();
        parsed.algorithm == Algorithm::Argon2id.ident()
            && Params::try_from(parsed).is_ok_and(|params| {
                params.m_cost() == local.m_cost()
                    && params.t_cost() == local.t_cost()
                    && params.p_cost() == local.p_cost()
            })
    }

    fn argon2_verify(&self, presented: &str, parsed: &PasswordHash<'_>) -> bool {
        #[cfg(test)]
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.argon2.verify_password(presented.as_bytes(), parsed).is_ok()
    }

    /// Argon2 verifications performed by this verifier and its clones.
    #[cfg(test)]
    pub(crate) fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier").finish()
    }
}

fn hash_with(argon2: &Argon2<'static>, secret: &str) -> StoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Hash(e.to_string()))
}
