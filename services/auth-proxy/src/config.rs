//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets never live in the TOML: the session signing key comes from
//! the SESSION_SECRET env var or `[session].secret_file`, the provider
//! app secret from DBX_APP_SECRET or `[provider].app_secret_file`. The
//! env var wins in both cases.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub return_mode: ReturnMode,
}

/// What the code-exchange endpoint hands back to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Provider tokens stay server-side; clients get a session
    /// credential and use the refresh endpoint for access tokens.
    #[default]
    SessionCredential,
    /// Clients get the raw provider token pair alongside their user id.
    RawProviderToken,
}

/// Dropbox app settings
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub app_key: String,
    #[serde(skip)]
    pub app_secret: Option<Secret<String>>,
    /// Path to a file containing the app secret (alternative to the
    /// DBX_APP_SECRET env var)
    #[serde(default)]
    pub app_secret_file: Option<PathBuf>,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session credential settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
    /// Path to a file containing the signing key (alternative to the
    /// SESSION_SECRET env var)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    #[serde(default = "default_validity_days")]
    pub validity_days: u64,
}

/// Credential store settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_ttl_days")]
    pub token_ttl_days: u64,
}

fn default_max_connections() -> usize {
    1000
}

fn default_token_endpoint() -> String {
    dropbox_oauth::constants::TOKEN_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_validity_days() -> u64 {
    30
}

fn default_ttl_days() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables for the two secrets.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.provider.app_key.trim().is_empty() {
            return Err(common::Error::Config("app_key must not be empty".into()));
        }

        if !config.provider.token_endpoint.starts_with("http://")
            && !config.provider.token_endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token_endpoint must start with http:// or https://, got: {}",
                config.provider.token_endpoint
            )));
        }

        if config.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.session.validity_days == 0 {
            return Err(common::Error::Config(
                "validity_days must be greater than 0".into(),
            ));
        }

        if config.store.token_ttl_days == 0 {
            return Err(common::Error::Config(
                "token_ttl_days must be greater than 0".into(),
            ));
        }

        config.provider.app_secret =
            resolve_secret("DBX_APP_SECRET", config.provider.app_secret_file.as_deref())?;
        if config.provider.app_secret.is_none() {
            return Err(common::Error::Config(
                "provider app secret missing: set DBX_APP_SECRET or [provider].app_secret_file"
                    .into(),
            ));
        }

        config.session.secret =
            resolve_secret("SESSION_SECRET", config.session.secret_file.as_deref())?;
        if config.session.secret.is_none() {
            return Err(common::Error::Config(
                "session signing key missing: set SESSION_SECRET or [session].secret_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("dropbox-auth-proxy.toml")
    }
}

/// Resolve a secret: env var takes precedence over file. A file with
/// only whitespace counts as absent.
fn resolve_secret(
    env_var: &str,
    file: Option<&Path>,
) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(Some(Secret::new(value)));
    }
    if let Some(file) = file {
        let value = std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", file.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    Ok(None)
}
