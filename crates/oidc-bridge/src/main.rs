//! OIDC Bridge - Entry Point

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oidc_bridge::config::{AccountStoreKind, Config};
use oidc_bridge::server::AuthServer;

#[derive(Parser, Debug)]
#[command(name = "oidc-bridge")]
#[command(about = "OpenID Connect authorization server with pluggable account stores")]
#[command(version)]
struct Cli {
    /// Issuer identifier and public base URL
    #[arg(long, default_value = "http://localhost:8888", env = "ISSUER")]
    issuer: String,

    /// HTTP server port
    #[arg(long, default_value = "8888", env = "PORT")]
    port: u16,

    /// Account store backend
    #[arg(long, value_enum, default_value_t, env = "ACCOUNT_STORE")]
    account_store: AccountStoreKind,

    /// JSON seed file for the memory store
    #[arg(long, env = "ACCOUNTS_FILE")]
    accounts_file: Option<PathBuf>,

    /// Base URL of the remote account service
    #[arg(long, env = "ACCOUNT_STORE_URL")]
    account_store_url: Option<String>,

    /// API key sent to the remote account service
    #[arg(long, env = "ACCOUNT_STORE_API_KEY", hide_env_values = true)]
    account_store_api_key: Option<String>,

    /// JSON file with static client metadata
    #[arg(long, env = "CLIENTS_FILE")]
    clients_file: Option<PathBuf>,

    /// Bearer token required for dynamic client registration
    #[arg(long, env = "INITIAL_ACCESS_TOKEN", hide_env_values = true)]
    initial_access_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.issuer);
        config.account_store = self.account_store;
        config.accounts_file = self.accounts_file;
        config.remote_store.base_url = self.account_store_url;
        config.remote_store.api_key = self.account_store_api_key;
        config.clients_file = self.clients_file;
        config.initial_access_token = self.initial_access_token;
        config
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let port = cli.port;
    let config = cli.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        issuer = %config.issuer,
        account_store = ?config.account_store,
        "Starting OIDC bridge"
    );

    let server = AuthServer::from_config(&config).await?;
    server.run_http(port).await
}
