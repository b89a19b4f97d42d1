use hub::{ConnectionOptions, ReconnectPolicy};
use proto::{ConfigError, DEFAULT_QUEUES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level agent desk configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chat server endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// Agent identity and queue subscriptions.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Reconnect and liveness tuning.
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Chat server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Scheme, host and port of the chat server.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HTTP login endpoint path.
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Hub endpoint path.
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
}

fn default_base_url() -> String {
    "https://10.0.0.154:5143".to_string()
}

fn default_login_path() -> String {
    "/api/account/login".to_string()
}

fn default_hub_path() -> String {
    "/chatHub".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            hub_path: default_hub_path(),
        }
    }
}

/// Agent identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default login name; `--username` wins.
    #[serde(default)]
    pub username: String,
    /// Queues subscribed at `AgentLogin`.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
}

fn default_queues() -> Vec<String> {
    DEFAULT_QUEUES.iter().map(|q| q.to_string()).collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            queues: default_queues(),
        }
    }
}

/// Reconnect and liveness tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_reconnect_delays_ms")]
    pub reconnect_delays_ms: Vec<u64>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_reconnect_delays_ms() -> Vec<u64> {
    vec![0, 2_000, 10_000, 30_000]
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_server_timeout_secs() -> u64 {
    30
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delays_ms: default_reconnect_delays_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            server_timeout_secs: default_server_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ConnectionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Notification output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Ring the terminal bell on new requests and messages.
    #[serde(default = "default_bell")]
    pub bell: bool,
}

fn default_bell() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { bell: true }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join("config.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = Self::home_dir()?.join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        if let Ok(server) = std::env::var("AGENTDESK_SERVER") {
            config.server.base_url = server;
        }
        if let Ok(username) = std::env::var("AGENTDESK_USERNAME") {
            config.agent.username = username;
        }
        if let Ok(queues) = std::env::var("AGENTDESK_QUEUES") {
            config.agent.queues = queues
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        debug!(
            server = %config.server.base_url,
            queues = ?config.agent.queues,
            "Config loaded"
        );
        Ok(config)
    }

    /// `~/.agentdesk`, if `HOME` is set.
    pub fn home_dir() -> Option<PathBuf> {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".agentdesk"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let base = self.server.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "server.base_url".to_string(),
                reason: format!("'{base}' is not an http(s) URL"),
            });
        }
        if self.agent.queues.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agent.queues".to_string(),
                reason: "at least one queue is required".to_string(),
            });
        }
        if self.connection.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.keep_alive_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.connection.handshake_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.handshake_timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.connection.server_timeout_secs <= self.connection.keep_alive_secs {
            return Err(ConfigError::InvalidValue {
                field: "connection.server_timeout_secs".to_string(),
                reason: "must exceed keep_alive_secs".to_string(),
            });
        }
        Ok(())
    }

    /// Session tunables derived from `[agent]` and `[connection]`.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            queues: self.agent.queues.clone(),
            reconnect: ReconnectPolicy::new(
                self.connection
                    .reconnect_delays_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
            ),
            keep_alive: Duration::from_secs(self.connection.keep_alive_secs),
            server_timeout: Duration::from_secs(self.connection.server_timeout_secs),
        }
    }
}
