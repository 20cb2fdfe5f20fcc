//! Configuration module for the hamon server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Service name used when neither the CLI nor the config file sets one
pub const DEFAULT_NAME: &str = "hamon";

/// Listen backlog for the socket
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Whether a socket file nobody is serving gets removed at startup
pub const DEFAULT_RECLAIM_STALE: bool = true;

/// How long shutdown waits for open connections
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "hamon")]
#[command(version = "0.1.0")]
#[command(about = "An echo server listening on a Unix domain socket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service name; the socket is bound at <socket-dir>/<name>.sock
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory holding the socket file (defaults to the system temp dir)
    #[arg(short = 'd', long)]
    pub socket_dir: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Listen backlog for the socket
    #[arg(long)]
    pub backlog: Option<i32>,

    /// How long shutdown waits for open connections, in milliseconds
    #[arg(long)]
    pub drain_timeout_ms: Option<u64>,

    /// What a connection does after a failed write
    #[arg(long, value_enum)]
    pub on_write_error: Option<WriteErrorPolicy>,

    /// Fail instead of removing a socket file no process is serving
    #[arg(long)]
    pub no_reclaim_stale: bool,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Behavior of a connection after a write to the client fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteErrorPolicy {
    /// Log and close the connection, same as a read failure
    #[default]
    Close,
    /// Log and keep reading from the connection
    Continue,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Service name
    #[serde(default = "default_name")]
    pub name: String,
    /// Directory holding the socket file
    pub socket_dir: Option<PathBuf>,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Remove a leftover socket file when nothing is listening on it
    #[serde(default = "default_reclaim_stale")]
    pub reclaim_stale: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            socket_dir: None,
            workers: None,
            backlog: default_backlog(),
            reclaim_stale: default_reclaim_stale(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Drain timeout at shutdown in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Behavior after a failed write
    #[serde(default)]
    pub on_write_error: WriteErrorPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
            on_write_error: WriteErrorPolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_reclaim_stale() -> bool {
    DEFAULT_RECLAIM_STALE
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub socket_dir: PathBuf,
    pub workers: Option<usize>,
    pub backlog: i32,
    pub reclaim_stale: bool,
    pub drain_timeout: Duration,
    pub on_write_error: WriteErrorPolicy,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve parsed CLI arguments, reading the TOML file they point at.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => read_toml(config_path)?,
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let name = cli.name.unwrap_or(toml_config.server.name);
        validate_name(&name)?;

        Ok(Config {
            name,
            socket_dir: cli
                .socket_dir
                .or(toml_config.server.socket_dir)
                .unwrap_or_else(std::env::temp_dir),
            workers: cli.workers.or(toml_config.server.workers),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            reclaim_stale: !cli.no_reclaim_stale && toml_config.server.reclaim_stale,
            drain_timeout: Duration::from_millis(
                cli.drain_timeout_ms
                    .unwrap_or(toml_config.connection.drain_timeout_ms),
            ),
            on_write_error: cli
                .on_write_error
                .unwrap_or(toml_config.connection.on_write_error),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Check that a service name maps to a single file inside the socket dir.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name == "." || name == ".." {
        "must not be a relative directory"
    } else if name.contains(std::path::is_separator) {
        "must not contain a path separator"
    } else if name.contains('\0') {
        "must not contain a NUL byte"
    } else {
        return Ok(());
    };

    Err(ConfigError::InvalidName(name.to_string(), reason))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("invalid service name {0:?}: {1}")]
    InvalidName(String, &'static str),
}
