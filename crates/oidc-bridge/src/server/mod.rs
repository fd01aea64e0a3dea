//! HTTP server wiring.
//!
//! Builds the account store, the embedded provider and the interaction
//! controller once at startup and shares them through [`HttpState`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::account::{
    AccountResolver, AccountStore, Authenticator, CredentialVerifier, build_account_store,
};
use crate::config::Config;
use crate::interaction::{InteractionController, handlers as interaction};
use crate::provider::clients::{ClientRegistry, default_clients};
use crate::provider::{EmbeddedProvider, handlers as provider};

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub provider: Arc<EmbeddedProvider>,
    pub interactions: InteractionController,
    pub resolver: AccountResolver,
    /// Bearer token required by `POST /reg`, if any.
    pub initial_access_token: Option<String>,
    pub session_cookie: String,
    pub secure_cookies: bool,
    /// Name of the active account store backend.
    pub account_store: &'static str,
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("provider", &self.provider)
            .field("account_store", &self.account_store)
            .field("session_cookie", &self.session_cookie)
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<HttpState>) -> Router {
    // Interaction screens must never be cached.
    let interactions = Router::new()
        .route("/interaction/{uid}", get(interaction::handle_show))
        .route("/interaction/{uid}/login", post(interaction::handle_login))
        .route("/interaction/{uid}/confirm", post(interaction::handle_confirm))
        .route("/interaction/{uid}/abort", get(interaction::handle_abort))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store"),
        ));

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/.well-known/openid-configuration", get(provider::handle_discovery))
        .route("/auth", get(provider::handle_authorize))
        .route("/token", post(provider::handle_token))
        .route("/token/introspection", post(provider::handle_introspection))
        .route("/token/revocation", post(provider::handle_revocation))
        .route("/me", get(provider::handle_userinfo))
        .route("/reg", post(provider::handle_register))
        .route("/reg/{client_id}", get(provider::handle_client_read))
        .merge(interactions)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oidc-bridge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "service": "oidc-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "issuer": state.provider.issuer(),
        "account_store": state.account_store
    }))
}

/// The authorization server.
pub struct AuthServer {
    state: Arc<HttpState>,
}

impl AuthServer {
    /// Assemble a server around an already constructed account store.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn AccountStore>,
        clients: ClientRegistry,
        verifier: CredentialVerifier,
    ) -> Self {
        let provider = Arc::new(EmbeddedProvider::new(config.issuer.clone(), clients, config.ttl));
        let resolver = AccountResolver::new(Arc::clone(&store));
        let authenticator = Authenticator::new(Arc::clone(&store), verifier);
        let interactions =
            InteractionController::new(provider.clone(), authenticator, resolver.clone());

        let state = Arc::new(HttpState {
            provider,
            interactions,
            resolver,
            initial_access_token: config.initial_access_token.clone(),
            session_cookie: config.session_cookie.clone(),
            secure_cookies: config.secure_cookies(),
            account_store: store.name(),
        });

        Self { state }
    }

    /// Build everything from configuration: hashing, account store and clients.
    ///
    /// # Errors
    ///
    /// Returns error if the account store or the clients file cannot be loaded.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let verifier = CredentialVerifier::new(&config.hashing)?;
        let store = build_account_store(config, &verifier).await?;
        let clients = match config.clients_file {
            Some(ref path) => ClientRegistry::load_file(path).await?,
            None => ClientRegistry::new(default_clients())?,
        };

        tracing::info!(clients = clients.len(), "Static clients loaded");
        Ok(Self::new(config, store, clients, verifier))
    }

    /// Shared handler state.
    #[must_use]
    pub const fn state(&self) -> &Arc<HttpState> {
        &self.state
    }

    /// The HTTP router for this server.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve HTTP until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        Arc::clone(self.state.provider.store()).start_cleanup_task();

        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!(issuer = %self.state.provider.issuer(), "HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer").field("state", &self.state).finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
