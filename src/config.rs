//! Configuration module for ack-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::protocols::ack::READ_BUFFER_SIZE;

/// Command-line arguments for the acknowledgement server
#[derive(Parser, Debug, Default)]
#[command(name = "ack-server")]
#[command(version)]
#[command(about = "A TCP server that acknowledges whatever a client sends", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0 or ::1)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of connections handled at once (unbounded if unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Delay between sending the acknowledgement and closing, in milliseconds
    #[arg(long)]
    pub grace_period_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
    pub max_connections: Option<usize>,
    /// How long to wait for in-flight connections after shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_connections: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7777
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_read_buffer_size() -> usize {
    READ_BUFFER_SIZE
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings consumed by a single connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub read_buffer_size: usize,
    pub grace_period: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            grace_period: Duration::from_millis(default_grace_period_ms()),
        }
    }
}

/// Settings consumed by the listener/dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: Option<usize>,
    pub shutdown_timeout: Duration,
    pub connection: ConnectionSettings,
}

impl ServerSettings {
    /// `host:port` string used for resolution and logging.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerSettings,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source: Box::new(e),
                })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            connection,
            logging,
        } = toml_config;

        let config = Config {
            server: ServerSettings {
                host: cli.host.unwrap_or(server.host),
                port: cli.port.unwrap_or(server.port),
                max_connections: cli.max_connections.or(server.max_connections),
                shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
                connection: ConnectionSettings {
                    read_buffer_size: connection.read_buffer_size,
                    grace_period: Duration::from_millis(
                        cli.grace_period_ms.unwrap_or(connection.grace_period_ms),
                    ),
                },
            },
            workers: cli.workers.or(server.workers),
            log_level: cli.log_level.unwrap_or(logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.connection.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "connection.read_buffer_size must be greater than zero",
            ));
        }
        match self.server.max_connections {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "server.max_connections must be greater than zero",
                ))
            }
            Some(max) if max > Semaphore::MAX_PERMITS => {
                return Err(ConfigError::Invalid("server.max_connections is too large"))
            }
            _ => {}
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("server.workers must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_default_config() {
        let config = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7777);
        assert_eq!(config.server.max_connections, None);
        assert_eq!(config.server.connection.read_buffer_size, 4000);
        assert_eq!(
            config.server.connection.grace_period,
            Duration::from_secs(2)
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            workers = 4
            max_connections = 128

            [connection]
            read_buffer_size = 512
            grace_period_ms = 250

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(CliArgs::default(), toml_config).unwrap();
        assert_eq!(config.server.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.server.max_connections, Some(128));
        assert_eq!(config.server.connection.read_buffer_size, 512);
        assert_eq!(
            config.server.connection.grace_period,
            Duration::from_millis(250)
        );
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        let cli = CliArgs {
            port: Some(9100),
            grace_period_ms: Some(10),
            log_level: Some("trace".to_string()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.server.connection.grace_period,
            Duration::from_millis(10)
        );
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_cli_flags_parse() {
        let cli = CliArgs::try_parse_from(["ack-server", "-p", "8080", "--max-connections", "3"])
            .unwrap();
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.max_connections, Some(3));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [connection]
            read_buffer_size = 0
            "#,
        )
        .unwrap();
        let err = Config::merge(CliArgs::default(), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_oversized_max_connections() {
        let cli = CliArgs {
            max_connections: Some(usize::MAX),
            ..CliArgs::default()
        };
        let err = Config::merge(cli, TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let cli = CliArgs {
            max_connections: Some(Semaphore::MAX_PERMITS),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.server.max_connections, Some(Semaphore::MAX_PERMITS));
    }

    #[test]
    fn test_version_comes_from_package() {
        let command = CliArgs::command();
        assert_eq!(command.get_version(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let cli = CliArgs {
            host: Some("::1".to_string()),
            port: Some(1),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.server.listen_addr(), "[::1]:1");
    }
}
