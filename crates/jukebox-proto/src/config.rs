use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::platform;
use crate::protocol::ProtocolRevision;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host[:port]` of the backend; the socket lives at `/ws`.
    #[serde(default = "default_host")]
    pub host: String,
    /// `wss://` when true, plain `ws://` otherwise.
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// Give up on a connection attempt that has not completed the websocket
    /// handshake after this long.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts after a lost connection before the session closes for good.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Spread each delay by up to ±30 %.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub revision: ProtocolRevision,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            secure: default_secure(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

fn default_host() -> String {
    "sb.invalidsyn.tax".to_string()
}

fn default_secure() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    600
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    8
}

fn default_jitter() -> bool {
    true
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        // A zero period would spin.
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Config {
    /// Load from the default location, writing defaults out on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
