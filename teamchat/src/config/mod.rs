//! Configuration system for the `TeamChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/teamchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

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

    /// Could not determine a directory for durable state.
    #[error("could not determine data directory (no HOME or XDG_DATA_HOME)")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
    reconnect: ReconnectFileConfig,
    storage: StorageFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    url: Option<String>,
    auth_token: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    dispatch_interval_ms: Option<u64>,
    retry_cap_secs: Option<u64>,
    page_size: Option<u32>,
    send_timeout_secs: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_secs: Option<u64>,
    jitter_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Outbox dispatch and paging configuration (used by the sync engine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between outbox dispatch passes.
    pub dispatch_interval: Duration,
    /// Ceiling for the exponential retry backoff.
    pub retry_cap: Duration,
    /// Page size for chat list and message history requests.
    pub page_size: u32,
    /// Per-attempt timeout for a message send.
    pub send_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(2),
            retry_cap: Duration::from_secs(30),
            page_size: 50,
            send_timeout: Duration::from_secs(15),
        }
    }
}

/// Realtime connection supervision configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the exponential reconnect backoff.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(350),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the REST API.
    pub server_url: Option<String>,
    /// Bearer token presented on every request.
    pub auth_token: Option<String>,

    // -- Sync --
    /// Outbox dispatch and paging settings.
    pub sync: SyncConfig,

    // -- Reconnect --
    /// Realtime connection supervision settings.
    pub reconnect: ReconnectConfig,

    // -- Storage --
    /// Directory for durable state (outbox snapshot). `None` means use the
    /// platform data directory.
    pub data_dir: Option<PathBuf>,
}

/// Connection settings required to talk to a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the REST API.
    pub server_url: String,
    /// Bearer token.
    pub auth_token: String,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/teamchat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let sync_defaults = SyncConfig::default();
        let reconnect_defaults = ReconnectConfig::default();

        Self {
            server_url: cli.server_url.clone().or_else(|| file.server.url.clone()),
            auth_token: cli
                .auth_token
                .clone()
                .or_else(|| file.server.auth_token.clone()),
            sync: SyncConfig {
                dispatch_interval: file
                    .sync
                    .dispatch_interval_ms
                    .map_or(sync_defaults.dispatch_interval, Duration::from_millis),
                retry_cap: file
                    .sync
                    .retry_cap_secs
                    .map_or(sync_defaults.retry_cap, Duration::from_secs),
                page_size: file.sync.page_size.unwrap_or(sync_defaults.page_size),
                send_timeout: file
                    .sync
                    .send_timeout_secs
                    .map_or(sync_defaults.send_timeout, Duration::from_secs),
            },
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(reconnect_defaults.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_secs
                    .map_or(reconnect_defaults.max_delay, Duration::from_secs),
                jitter: file
                    .reconnect
                    .jitter_ms
                    .map_or(reconnect_defaults.jitter, Duration::from_millis),
                connect_timeout: file
                    .reconnect
                    .connect_timeout_secs
                    .map_or(reconnect_defaults.connect_timeout, Duration::from_secs),
            },
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone().map(PathBuf::from)),
        }
    }

    /// Build a [`SessionConfig`] from this configuration, if the server
    /// URL and auth token are both present.
    ///
    /// Returns `None` if either is missing (the client cannot authenticate).
    #[must_use]
    pub fn to_session_config(&self) -> Option<SessionConfig> {
        let server_url = self.server_url.clone()?;
        let auth_token = self.auth_token.clone()?;

        if server_url.is_empty() || auth_token.is_empty() {
            return None;
        }

        Some(SessionConfig {
            server_url,
            auth_token,
        })
    }

    /// Resolve the directory for durable state, creating nothing.
    ///
    /// Prefers the configured `data_dir`, then the platform data directory
    /// with a `teamchat` subfolder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] if no directory can be determined.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join("teamchat"))
            .ok_or(ConfigError::NoDataDir)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first team chat client")]
pub struct CliArgs {
    /// Base URL of the chat server REST API.
    #[arg(long, env = "TEAMCHAT_SERVER")]
    pub server_url: Option<String>,

    /// Bearer token used to authenticate requests.
    #[arg(long, env = "TEAMCHAT_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Path to config file (default: `~/.config/teamchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for durable state such as the outbox snapshot.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TEAMCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/teamchat.log`).
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
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available, use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("teamchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
