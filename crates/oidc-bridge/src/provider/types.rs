//! Records held by the provider store.

use chrono::{DateTime, Utc};

use super::{AuthorizationParams, ClientMetadata, Prompt};

/// Whether a record created at `created_at` has outlived `lifetime` seconds.
pub fn is_expired(created_at: DateTime<Utc>, lifetime: u64) -> bool {
    (Utc::now() - created_at).num_seconds() >= lifetime as i64
}

/// Results gathered so far for one authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Account that logged in (or was confirmed) during this request.
    pub login: Option<String>,
    /// Consent was given during this request.
    pub consent: bool,
    /// The end user answered an account-selection prompt.
    pub account_selected: bool,
}

/// A pending interaction.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub uid: String,
    pub prompt: Prompt,
    pub params: AuthorizationParams,
    /// Browser session the request arrived with.
    pub session_id: Option<String>,
    pub submission: Submission,
    pub created_at: DateTime<Utc>,
}

/// An authenticated browser session.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub account_id: String,
    pub created_at: DateTime<Utc>,
}

/// Scopes an account has consented to for one client.
#[derive(Debug, Clone)]
pub struct Grant {
    pub scopes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// An authorization code issued after the interaction completed.
#[derive(Debug, Clone)]
pub struct AuthCode {
    pub client_id: String,
    pub account_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub used: bool,
}

/// An opaque access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub client_id: String,
    /// `None` for client credentials tokens.
    pub account_id: Option<String>,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: u64,
}

/// An opaque refresh token.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub client_id: String,
    pub account_id: String,
    pub access_token: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: u64,
}

/// A dynamically registered client.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub metadata: ClientMetadata,
    pub registration_access_token: String,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        is_expired(self.created_at, self.expires_in)
    }

    /// Unix expiry time.
    pub fn expires_at(&self) -> i64 {
        self.created_at.timestamp() + self.expires_in as i64
    }
}

impl RefreshToken {
    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        is_expired(self.created_at, self.expires_in)
    }

    /// Unix expiry time.
    pub fn expires_at(&self) -> i64 {
        self.created_at.timestamp() + self.expires_in as i64
    }
}
