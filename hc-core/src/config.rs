//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: the
//! server address, connection timeouts, reconnect policy, heartbeat
//! interval, and encryption settings. Configuration is persisted as TOML
//! on disk and every field has a serde default, so a partial file is valid.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HcError, HcResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Liveness probing.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Payload encryption settings.
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket server URL (e.g., "wss://chat.example.org/ws").
    #[serde(default)]
    pub address: String,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Static bearer token used by the CLI when no login flow is present.
    #[serde(default)]
    pub auth_token: String,
}

/// Reconnection policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (0 = reconnection disabled).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Grow the delay by 1.5x per attempt instead of keeping it constant.
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat envelopes in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Encrypt outbound chat messages.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Use the XOR fallback instead of AES-GCM. Not HIPAA-grade.
    #[serde(default)]
    pub legacy_mode: bool,

    /// Interval between automatic key rotations in milliseconds.
    #[serde(default = "default_rotation_interval")]
    pub key_rotation_interval_ms: u64,

    /// Path of the key storage file. If empty, uses the default location.
    #[serde(default)]
    pub storage_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_RECONNECT_MAX_ATTEMPTS
}

fn default_base_delay() -> u64 {
    constants::DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_heartbeat_interval() -> u64 {
    constants::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_rotation_interval() -> u64 {
    constants::DEFAULT_KEY_ROTATION_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_ms: default_connect_timeout(),
            auth_token: String::new(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            exponential_backoff: true,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            legacy_mode: false,
            key_rotation_interval_ms: default_rotation_interval(),
            storage_path: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

/// Upper bound for every configured timer so deadline arithmetic cannot overflow.
pub const MAX_TIMER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn timer_millis(ms: u64) -> Duration {
    Duration::from_millis(ms).min(MAX_TIMER)
}

impl ServerConfig {
    /// Handshake timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        timer_millis(self.connect_timeout_ms)
    }
}

impl HeartbeatConfig {
    /// Heartbeat interval as a Duration.
    pub fn interval(&self) -> Duration {
        timer_millis(self.interval_ms)
    }
}

impl EncryptionConfig {
    /// Key rotation interval as a Duration.
    pub fn rotation_interval(&self) -> Duration {
        timer_millis(self.key_rotation_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> HcResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> HcResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&contents)?;
        config.server.address = Self::sanitize_server_address(&config.server.address);
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> HcResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| HcError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> HcResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective key storage path, using the configured path or the default.
    pub fn effective_key_store_path(&self) -> HcResult<PathBuf> {
        if self.encryption.storage_path.is_empty() {
            Ok(Platform::data_dir()?.join("keys.json"))
        } else {
            Ok(PathBuf::from(&self.encryption.storage_path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> HcResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether a server address is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty()
    }

    /// Sanitize and normalize a server address into a WebSocket URL.
    ///
    /// Strips quotes and trailing slashes, maps http(s) to ws(s), and
    /// defaults bare hosts to `ws://`.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else {
            format!("ws://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across components.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone the current configuration.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }
}
