//! Error types for the OIDC bridge.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! "Not found" is never an error here: lookups return `Ok(None)` for absent accounts.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Errors from an account store backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Transport failure reaching the backend (connection, DNS, TLS, timeout).
    #[error("Account store unreachable: {0}")]
    Unreachable(#[from] reqwest_middleware::Error),

    /// Backend answered with an unexpected status.
    #[error("Account store returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// Backend answered with a body that is not a valid account document.
    #[error("Malformed account store response: {0}")]
    Malformed(String),

    /// Two records share an id or login id.
    #[error("Duplicate account {field}: {value}")]
    Duplicate {
        /// Which unique field collided
        field: &'static str,
        /// The colliding value
        value: String,
    },

    /// Reading a seed file failed.
    #[error("Failed to read account seed: {0}")]
    Io(#[from] std::io::Error),

    /// Seed file or document was not valid JSON.
    #[error("Failed to parse account data: {0}")]
    Parse(#[from] serde_json::Error),

    /// Hashing a seed credential failed.
    #[error("Failed to hash credential: {0}")]
    Hash(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unreachable(reqwest_middleware::Error::Reqwest(err))
    }
}

impl StoreError {
    /// Create a malformed-response error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Errors reported by the protocol engine for interaction calls.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The interaction uid is unknown, expired, or already resumed.
    #[error("Interaction not found or expired: {0}")]
    InteractionNotFound(String),

    /// The submitted result cannot be applied in the interaction's current state.
    #[error("Invalid interaction result: {0}")]
    InvalidResult(String),

    /// The client referenced by the interaction no longer exists.
    #[error("Unknown client: {0}")]
    UnknownClient(String),
}

impl EngineError {
    /// Create an invalid-result error.
    #[must_use]
    pub fn invalid_result(message: impl Into<String>) -> Self {
        Self::InvalidResult(message.into())
    }
}

/// Errors surfaced by the interaction endpoints to the generic error pipeline.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Detail fetch or resume rejected by the engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Account store failure outside credential checking.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Engine(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short user-facing message that reveals no internals.
    #[must_use]
    pub const fn to_user_message(&self) -> &'static str {
        match self {
            Self::Engine(EngineError::InteractionNotFound(_)) => {
                "This sign-in request has expired or was already completed. Please start again."
            }
            Self::Engine(_) => "This sign-in request cannot continue. Please start again.",
            Self::Store(_) => "The account service is temporarily unavailable. Please try again later.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Interaction failed");
        let status = self.status();
        let body = crate::interaction::views::render_error_page(status, self.to_user_message());
        (status, Html(body)).into_response()
    }
}

/// RFC 6749 §5.2 error returned by the provider's JSON endpoints.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}: {description}")]
pub struct OAuthError {
    /// Error code (`invalid_request`, `invalid_grant`, ...)
    pub error: &'static str,
    /// Human-readable description
    pub description: String,
    /// HTTP status to answer with
    pub status: StatusCode,
}

impl OAuthError {
    #[must_use]
    pub fn new(error: &'static str, description: impl Into<String>) -> Self {
        Self { error, description: description.into(), status: StatusCode::BAD_REQUEST }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, ..Self::new("invalid_client", description) }
    }

    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, ..Self::new("invalid_token", description) }
    }

    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, ..Self::new("server_error", description) }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        tracing::debug!(error = self.error, description = %self.description, "OAuth error");
        let mut response = (
            self.status,
            axum::Json(serde_json::json!({
                "error": self.error,
                "error_description": self.description
            })),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(axum::http::header::CACHE_CONTROL, axum::http::HeaderValue::from_static("no-store"));
        if self.status == StatusCode::UNAUTHORIZED {
            let challenge = if self.error == "invalid_token" {
                r#"Bearer error="invalid_token""#
            } else {
                r#"Basic realm="token""#
            };
            headers.insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static(challenge),
            );
        }
        response
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
