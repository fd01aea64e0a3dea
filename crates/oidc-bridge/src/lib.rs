//! OIDC Bridge
//!
//! An OpenID Connect authorization server front end: login, account selection
//! and consent screens wired to a pluggable account store and an embedded
//! authorization-code provider.
//!
//! # Features
//!
//! - **Pluggable account store**: in-memory table or a remote HTTP document service
//! - **Timing-safe authentication**: Argon2id with a dummy hash for unknown logins
//! - **Interaction state machine**: select account, login, consent and abort
//! - **Embedded provider**: PKCE authorization code, refresh, client credentials,
//!   introspection, revocation, userinfo and dynamic registration
//!
//! # Example
//!
//! ```no_run
//! use oidc_bridge::{config::Config, server::AuthServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = AuthServer::from_config(&config).await?;
//!     server.run_http(8888).await
//! }
//! ```

pub mod account;
pub mod config;
pub mod error;
pub mod interaction;
pub mod provider;
pub mod server;

pub use account::{AccountRecord, AccountStore, Authenticator, AccountResolver, Identity};
pub use config::Config;
pub use error::{AppError, EngineError, OAuthError, StoreError};
pub use interaction::InteractionController;
pub use provider::{EmbeddedProvider, ProtocolEngine};
pub use server::AuthServer;
