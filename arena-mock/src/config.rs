//! Configuration for the mock backend.
//!
//! Priority (highest first): CLI arguments, environment variables (via clap
//! `env`), `~/.config/arena-mock/config.toml`, compiled defaults.

use std::path::{Path, PathBuf};

use crate::state::{
    DEFAULT_BROADCAST_TOPIC, DEFAULT_PENDING_COUNT, DEFAULT_SEND_DESTINATION, Destinations,
};

/// Errors raised while loading the mock backend configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MockConfigFile {
    server: ServerSection,
    broker: BrokerSection,
    fixtures: FixturesSection,
}

/// `[server]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
}

/// `[broker]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BrokerSection {
    broadcast_topic: Option<String>,
    send_destination: Option<String>,
}

/// `[fixtures]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FixturesSection {
    pending_count: Option<u64>,
}

/// CLI arguments for `arena-mock`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Arena development backend (REST fixtures + STOMP broker)")]
pub struct MockCliArgs {
    /// Address to listen on.
    #[arg(short, long, env = "ARENA_MOCK_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/arena-mock/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pending moderation count reported to moderators.
    #[arg(long)]
    pub pending_count: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ARENA_MOCK_LOG")]
    pub log_level: String,
}

/// Resolved mock backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    /// Listen address.
    pub bind_addr: String,
    /// Broker destinations.
    pub destinations: Destinations,
    /// Initial pending moderation count.
    pub pending_count: u64,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            destinations: Destinations::default(),
            pending_count: DEFAULT_PENDING_COUNT,
            log_level: "info".to_string(),
        }
    }
}

impl MockConfig {
    /// Merges CLI arguments with the config file and defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicitly named file is missing, or
    /// any config file cannot be read or parsed.
    pub fn load(cli: &MockCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    fn resolve(cli: &MockCliArgs, file: MockConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            destinations: Destinations {
                send: file
                    .broker
                    .send_destination
                    .unwrap_or_else(|| DEFAULT_SEND_DESTINATION.to_string()),
                broadcast: file
                    .broker
                    .broadcast_topic
                    .unwrap_or_else(|| DEFAULT_BROADCAST_TOPIC.to_string()),
            },
            pending_count: cli
                .pending_count
                .or(file.fixtures.pending_count)
                .unwrap_or(defaults.pending_count),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit: Option<&Path>) -> Result<MockConfigFile, ConfigError> {
    if let Some(path) = explicit {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(path) = dirs::config_dir().map(|d| d.join("arena-mock").join("config.toml")) else {
        return Ok(MockConfigFile::default());
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MockConfigFile::default()),
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
