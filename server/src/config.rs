//! Server configuration.
//!
//! The configuration is read once at startup into a [`Config`] which is then
//! handed to each component. Nothing in the server reads settings from
//! process-wide state afterwards.

use std::env;
use std::net::{Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};
use csvgate::session::FileName;

/// Environment variable holding the path to the configuration file.
pub const ENV_CONFIG_PATH: &str = "CSVGATE_SERVER_CONFIG";

/// Environment variable overriding `api_token`.
pub const ENV_API_TOKEN: &str = "CSVGATE_API_TOKEN";

/// Configuration file used when no path is given.
const DEFAULT_CONFIG_PATH: &str = "csvgate.toml";

/// Configuration for the csvgate server.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen: SocketAddr,

    /// Bearer token clients must present.
    #[serde(default)]
    pub api_token: String,

    /// Directory holding one subdirectory per upload session.
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[serde(default)]
    pub debug: bool,

    /// Chunked upload settings.
    #[serde(default)]
    pub chunked_upload: ChunkedUploadConfig,

    /// Where session lifecycle records are kept.
    pub log_store: LogStoreConfig,

    /// File grouping settings.
    #[serde(default)]
    pub grouping: GroupingConfig,

    /// Reclamation of finished sessions.
    #[serde(default)]
    pub reclamation: ReclamationConfig,

    /// Target for table provisioning and bulk loads.
    ///
    /// Loading tables is refused when this is not set.
    #[serde(default)]
    pub provisioning: Option<ClickHouseConfig>,
}

/// Chunked upload configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ChunkedUploadConfig {
    /// Name of the chunk scratch directory inside each session directory.
    #[serde(default = "default_chunk_subdir")]
    pub chunk_subdir: String,

    /// Largest request body accepted for a chunk or an initial upload.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
}

/// Log store configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum LogStoreConfig {
    /// ClickHouse over its HTTP interface.
    #[serde(rename = "clickhouse")]
    ClickHouse(ClickHouseConfig),

    /// A SQL database reachable through sea-orm.
    #[serde(rename = "database")]
    Database(DatabaseConfig),
}

/// ClickHouse connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_host")]
    pub host: String,

    /// Port of the HTTP interface.
    #[serde(default = "default_clickhouse_port")]
    pub port: u16,

    #[serde(default = "default_clickhouse_database")]
    pub database: String,

    #[serde(default = "default_clickhouse_username")]
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Connect over HTTPS.
    #[serde(default)]
    pub tls: bool,

    /// Name of the session log table.
    #[serde(default = "default_log_table")]
    pub table: String,
}

/// Database connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, such as `sqlite:///var/lib/csvgate/log.db?mode=rwc`.
    pub url: String,
}

/// File grouping configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct GroupingConfig {
    /// Number of files parsed at once.
    #[serde(default = "default_grouping_workers")]
    pub workers: usize,

    /// Suffix of files considered for grouping.
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
}

/// Reclamation configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ReclamationConfig {
    /// Run the background reclamation loop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause between two cycles, in seconds.
    #[serde(default = "default_reclamation_interval")]
    pub interval_secs: u64,

    /// Minimum age of `end_time` before a session is reclaimed, in seconds.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Config {
    /// Parses and validates a configuration file's contents.
    pub fn from_toml(s: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(s).map_err(ServerError::configuration_error)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ServerResult<()> {
        if self.api_token.trim().is_empty() {
            return Err(ServerError::configuration_error(anyhow!(
                "api_token must be set (or provided through {})",
                ENV_API_TOKEN
            )));
        }

        FileName::new(self.chunked_upload.chunk_subdir.clone()).map_err(|e| {
            ServerError::configuration_error(anyhow!("chunked_upload.chunk_subdir: {}", e))
        })?;

        if self.chunked_upload.max_chunk_size == 0 {
            return Err(ServerError::configuration_error(anyhow!(
                "chunked_upload.max_chunk_size must be positive"
            )));
        }

        if self.grouping.workers == 0 {
            return Err(ServerError::configuration_error(anyhow!(
                "grouping.workers must be at least 1"
            )));
        }

        Ok(())
    }
}

impl ClickHouseConfig {
    /// Returns the base URL of the HTTP interface.
    pub fn endpoint(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

impl ReclamationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for ChunkedUploadConfig {
    fn default() -> Self {
        Self {
            chunk_subdir: default_chunk_subdir(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            workers: default_grouping_workers(),
            file_suffix: default_file_suffix(),
        }
    }
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reclamation_interval(),
            grace_period_secs: default_grace_period(),
        }
    }
}

/// Loads the configuration.
///
/// The path is taken from the argument, then from `CSVGATE_SERVER_CONFIG`,
/// then falls back to `csvgate.toml` in the working directory.
pub async fn load_config(path: Option<&Path>) -> ServerResult<Config> {
    let path = match path {
        Some(path) => path.to_owned(),
        None => env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
    };

    let s = tokio::fs::read_to_string(&path).await.map_err(|e| {
        ServerError::configuration_error(anyhow!("Failed to read {}: {}", path.display(), e))
    })?;

    let mut config: Config = toml::from_str(&s).map_err(ServerError::configuration_error)?;

    if let Ok(token) = env::var(ENV_API_TOKEN) {
        config.api_token = token;
    }

    config.validate()?;
    Ok(config)
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080))
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("/tmp/uploads")
}

fn default_chunk_subdir() -> String {
    "chunks".to_string()
}

fn default_max_chunk_size() -> u64 {
    64 * 1024 * 1024
}

fn default_clickhouse_host() -> String {
    "localhost".to_string()
}

fn default_clickhouse_port() -> u16 {
    8123
}

fn default_clickhouse_database() -> String {
    "default".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_log_table() -> String {
    "file_upload_log".to_string()
}

fn default_grouping_workers() -> usize {
    4
}

fn default_file_suffix() -> String {
    ".csv".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reclamation_interval() -> u64 {
    60
}

fn default_grace_period() -> u64 {
    60
}
