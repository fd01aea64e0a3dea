//! Configuration for the OIDC bridge.

use std::path::PathBuf;
use std::time::Duration;

/// Token, session and interaction lifetimes (seconds).
pub mod ttl {
    /// Authorization code lifetime: 10 minutes.
    pub const AUTHORIZATION_CODE: u64 = 600;

    /// Access token lifetime for end-user grants: 1 hour.
    pub const ACCESS_TOKEN: u64 = 3600;

    /// Access token lifetime for the client credentials grant: 10 minutes.
    pub const CLIENT_CREDENTIALS: u64 = 600;

    /// Pending interaction lifetime: 1 hour.
    pub const INTERACTION: u64 = 3600;

    /// Browser session lifetime: 1 hour.
    pub const SESSION: u64 = 3600;

    /// Grant (accumulated consent) lifetime: 14 days.
    pub const GRANT: u64 = 14 * 24 * 3600;

    /// Refresh token lifetime: 14 days.
    pub const REFRESH_TOKEN: u64 = 14 * 24 * 3600;
}

/// Cookie names.
pub mod cookies {
    /// Browser session cookie.
    pub const SESSION: &str = "_custom_auth_session";
}

/// Argon2id cost parameters for credential hashing.
pub mod hashing {
    /// Memory cost in KiB (Argon2 crate default).
    pub const MEMORY_KIB: u32 = 19 * 1024;

    /// Number of passes.
    pub const ITERATIONS: u32 = 2;

    /// Degree of parallelism.
    pub const PARALLELISM: u32 = 1;
}

/// Remote account store client settings.
pub mod remote {
    use std::time::Duration;

    /// Request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Lookup cache TTL.
    pub const CACHE_TTL: Duration = Duration::from_secs(30);

    /// Maximum cached lookups.
    pub const CACHE_MAX_SIZE: u64 = 10_000;

    /// Maximum retries for transient failures.
    pub const MAX_RETRIES: u32 = 2;
}

/// Scope-to-claim table used when filtering identity claims.
pub mod claims {
    /// Claims released for each scope.
    pub const SCOPE_CLAIMS: &[(&str, &[&str])] = &[("openid", &["sub"]), ("profile", &["loginId"])];

    /// Scopes the provider accepts in authorization requests.
    pub const SUPPORTED_SCOPES: &[&str] = &["openid", "profile", "offline_access"];
}

/// Which account store backend serves lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AccountStoreKind {
    /// In-process table seeded at startup.
    #[default]
    #[value(alias = "memorydb")]
    Memory,
    /// Networked document service reached over HTTP.
    #[value(alias = "http")]
    Remote,
}

impl std::str::FromStr for AccountStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "memorydb" => Ok(Self::Memory),
            "remote" | "http" => Ok(Self::Remote),
            other => anyhow::bail!("unknown account store '{other}' (expected 'memory' or 'remote')"),
        }
    }
}

/// Remote account store connection settings.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// Base URL of the document service (e.g. `https://accounts.internal`).
    pub base_url: Option<String>,

    /// API key sent as `x-api-key`.
    pub api_key: Option<String>,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Lookup cache TTL (zero disables caching).
    pub cache_ttl: Duration,

    /// Maximum cached lookups.
    pub cache_max_size: u64,

    /// Retries for transient failures.
    pub max_retries: u32,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            request_timeout: remote::REQUEST_TIMEOUT,
            connect_timeout: remote::CONNECT_TIMEOUT,
            cache_ttl: remote::CACHE_TTL,
            cache_max_size: remote::CACHE_MAX_SIZE,
            max_retries: remote::MAX_RETRIES,
        }
    }
}

/// Argon2 cost parameters.
///
/// Stored hashes (seed files and remote records alike) must be created with
/// these same parameters. A hash with a different cost verifies at a
/// different speed than an unknown login, so login timing would reveal which
/// accounts exist. Mismatches are logged at `warn` on every verification.
#[derive(Debug, Clone, Copy)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: hashing::MEMORY_KIB,
            iterations: hashing::ITERATIONS,
            parallelism: hashing::PARALLELISM,
        }
    }
}

/// Lifetimes applied by the embedded provider.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub authorization_code: u64,
    pub access_token: u64,
    pub client_credentials: u64,
    pub interaction: u64,
    pub session: u64,
    pub grant: u64,
    pub refresh_token: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            authorization_code: ttl::AUTHORIZATION_CODE,
            access_token: ttl::ACCESS_TOKEN,
            client_credentials: ttl::CLIENT_CREDENTIALS,
            interaction: ttl::INTERACTION,
            session: ttl::SESSION,
            grant: ttl::GRANT,
            refresh_token: ttl::REFRESH_TOKEN,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer identifier and public base URL (no trailing slash).
    pub issuer: String,

    /// Active account store backend.
    pub account_store: AccountStoreKind,

    /// JSON seed file for the memory store.
    pub accounts_file: Option<PathBuf>,

    /// Remote account store settings.
    pub remote_store: RemoteStoreConfig,

    /// JSON file with static client metadata (defaults are used when absent).
    pub clients_file: Option<PathBuf>,

    /// Bearer token required for dynamic client registration.
    pub initial_access_token: Option<String>,

    /// Browser session cookie name.
    pub session_cookie: String,

    /// Provider lifetimes.
    pub ttl: TtlConfig,

    /// Credential hashing cost.
    pub hashing: HashingConfig,
}

impl Config {
    /// Create a configuration for the given issuer with default settings.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            account_store: AccountStoreKind::Memory,
            accounts_file: None,
            remote_store: RemoteStoreConfig::default(),
            clients_file: None,
            initial_access_token: None,
            session_cookie: cookies::SESSION.to_string(),
            ttl: TtlConfig::default(),
            hashing: HashingConfig::default(),
        }
    }

    /// Create a test configuration: cheap hashing and no lookup caching.
    #[must_use]
    pub fn for_testing(issuer: &str) -> Self {
        let mut config = Self::new(issuer);
        config.hashing = HashingConfig { memory_kib: 1024, iterations: 1, parallelism: 1 };
        config.remote_store.cache_ttl = Duration::from_secs(0);
        config.remote_store.cache_max_size = 0;
        config.remote_store.max_retries = 0;
        config.remote_store.request_timeout = Duration::from_secs(5);
        config.remote_store.connect_timeout = Duration::from_secs(2);
        config
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let issuer = std::env::var("ISSUER").unwrap_or_else(|_| "http://localhost:8888".to_string());
        let mut config = Self::new(issuer);

        if let Ok(kind) = std::env::var("ACCOUNT_STORE") {
            config.account_store = kind.parse()?;
        }
        config.accounts_file = std::env::var("ACCOUNTS_FILE").ok().map(PathBuf::from);
        config.remote_store.base_url = std::env::var("ACCOUNT_STORE_URL").ok();
        config.remote_store.api_key = std::env::var("ACCOUNT_STORE_API_KEY").ok();
        config.clients_file = std::env::var("CLIENTS_FILE").ok().map(PathBuf::from);
        config.initial_access_token = std::env::var("INITIAL_ACCESS_TOKEN").ok();

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns error when the remote store is selected without a base URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.account_store == AccountStoreKind::Remote && self.remote_store.base_url.is_none() {
            anyhow::bail!("ACCOUNT_STORE=remote requires ACCOUNT_STORE_URL");
        }
        url::Url::parse(&self.issuer)
            .map_err(|e| anyhow::anyhow!("issuer '{}' is not a valid URL: {e}", self.issuer))?;
        Ok(())
    }

    /// Whether cookies should carry the `Secure` attribute.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.issuer.starts_with("https://")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://localhost:8888")
    }
}
