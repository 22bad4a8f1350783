//! Configuration for the `arena` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/arena/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. The bearer token is
//! never read from the file.

use std::path::PathBuf;
use std::time::Duration;

use arena_proto::model::{Role, User, UserId};

use crate::api::http::{DEFAULT_REQUEST_TIMEOUT, EndpointPaths};
use crate::badge::DEFAULT_BADGE_INTERVAL;
use crate::channel::manager::ChannelConfig;
use crate::channel::stomp::DEFAULT_CONNECT_TIMEOUT;
use crate::session::{Session, normalize_token};
use crate::unread::{DEFAULT_POLL_INTERVAL, UnreadPollerConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    polling: PollingFileConfig,
    realtime: RealtimeFileConfig,
    endpoints: EndpointsFileConfig,
    ui: UiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_base_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    username: Option<String>,
    user_id: Option<String>,
    role: Option<String>,
}

/// `[polling]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PollingFileConfig {
    unread_enabled: Option<bool>,
    unread_interval_ms: Option<u64>,
    badge_interval_secs: Option<u64>,
}

/// `[realtime]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RealtimeFileConfig {
    broadcast_topic: Option<String>,
    send_destination: Option<String>,
    reconnect_delay_ms: Option<u64>,
}

/// `[endpoints]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EndpointsFileConfig {
    unread_summary: Option<String>,
    mark_read: Option<String>,
    friends: Option<String>,
    open_conversation: Option<String>,
    message_history: Option<String>,
    pending_count: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// REST API base URL.
    pub api_base_url: String,
    /// Real-time channel WebSocket URL.
    pub ws_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Channel connect + handshake timeout.
    pub connect_timeout: Duration,

    // -- Session --
    /// Bearer token (CLI/env only).
    pub token: Option<String>,
    /// Signed-in username.
    pub username: Option<String>,
    /// Signed-in user id.
    pub user_id: Option<String>,
    /// Signed-in user's role.
    pub role: String,
    /// Username to open a conversation with on start-up.
    pub with: Option<String>,

    // -- Polling --
    /// Whether the unread poller runs.
    pub unread_enabled: bool,
    /// Unread poll interval.
    pub unread_interval: Duration,
    /// Pending badge poll interval.
    pub badge_interval: Duration,

    // -- Realtime --
    /// Channel destinations and reconnect delay.
    pub channel: ChannelConfig,

    // -- Endpoints --
    /// REST endpoint path templates.
    pub endpoints: EndpointPaths,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            token: None,
            username: None,
            user_id: None,
            role: "USER".to_string(),
            with: None,
            unread_enabled: true,
            unread_interval: DEFAULT_POLL_INTERVAL,
            badge_interval: DEFAULT_BADGE_INTERVAL,
            channel: ChannelConfig::default(),
            endpoints: EndpointPaths::default(),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or if any config file that exists cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` so it can be
    /// tested without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let paths = &file.endpoints;
        let default_paths = defaults.endpoints;

        Self {
            api_base_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_base_url.clone())
                .unwrap_or(defaults.api_base_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.server.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            token: cli.token.clone(),
            username: cli
                .username
                .clone()
                .or_else(|| file.session.username.clone()),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            role: cli
                .role
                .clone()
                .or_else(|| file.session.role.clone())
                .unwrap_or(defaults.role),
            with: cli.with.clone(),
            unread_enabled: !cli.no_unread
                && file
                    .polling
                    .unread_enabled
                    .unwrap_or(defaults.unread_enabled),
            unread_interval: file
                .polling
                .unread_interval_ms
                .map_or(defaults.unread_interval, Duration::from_millis),
            badge_interval: file
                .polling
                .badge_interval_secs
                .map_or(defaults.badge_interval, Duration::from_secs),
            channel: ChannelConfig {
                broadcast_topic: file
                    .realtime
                    .broadcast_topic
                    .clone()
                    .unwrap_or(defaults.channel.broadcast_topic),
                send_destination: file
                    .realtime
                    .send_destination
                    .clone()
                    .unwrap_or(defaults.channel.send_destination),
                reconnect_delay: file
                    .realtime
                    .reconnect_delay_ms
                    .map_or(defaults.channel.reconnect_delay, Duration::from_millis),
            },
            endpoints: EndpointPaths {
                unread_summary: paths
                    .unread_summary
                    .clone()
                    .unwrap_or(default_paths.unread_summary),
                mark_read: paths.mark_read.clone().unwrap_or(default_paths.mark_read),
                friends: paths.friends.clone().unwrap_or(default_paths.friends),
                open_conversation: paths
                    .open_conversation
                    .clone()
                    .unwrap_or(default_paths.open_conversation),
                message_history: paths
                    .message_history
                    .clone()
                    .unwrap_or(default_paths.message_history),
                pending_count: paths
                    .pending_count
                    .clone()
                    .unwrap_or(default_paths.pending_count),
            },
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Build the session, if a usable token, a username and a user id are
    /// all configured.
    #[must_use]
    pub fn to_session(&self) -> Option<Session> {
        let token = normalize_token(self.token.as_deref()?)?;
        let username = self.username.as_deref().map(str::trim)?;
        let user_id = self.user_id.as_deref().map(str::trim)?;
        if username.is_empty() || user_id.is_empty() {
            return None;
        }
        Some(Session::new(
            token,
            User {
                id: UserId::new(user_id),
                username: username.to_string(),
                role: Role::new(self.role.clone()),
                profile_image: None,
            },
        ))
    }

    /// Unread poller start-up parameters for `token`.
    #[must_use]
    pub fn unread_poller_config(&self, token: Option<String>) -> UnreadPollerConfig {
        UnreadPollerConfig {
            token,
            enabled: self.unread_enabled,
            poll_interval: self.unread_interval,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for Arena friend chat")]
pub struct CliArgs {
    /// REST API base URL.
    #[arg(long, env = "ARENA_API_URL")]
    pub api_url: Option<String>,

    /// Real-time channel WebSocket URL.
    #[arg(long, env = "ARENA_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token (with or without the `Bearer ` prefix).
    #[arg(long, env = "ARENA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your username.
    #[arg(long, env = "ARENA_USERNAME")]
    pub username: Option<String>,

    /// Your user id.
    #[arg(long, env = "ARENA_USER_ID")]
    pub user_id: Option<String>,

    /// Your role (USER, MODERATOR, ADMIN).
    #[arg(long, env = "ARENA_ROLE")]
    pub role: Option<String>,

    /// Open the conversation with this friend on start-up.
    #[arg(long)]
    pub with: Option<String>,

    /// Disable unread polling.
    #[arg(long)]
    pub no_unread: bool,

    /// Path to config file (default: `~/.config/arena/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ARENA_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/arena.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("arena").join("config.toml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
