//! Server configuration.
//!
//! Configuration is layered from, lowest priority first:
//! - Built-in defaults
//! - TOML configuration files (`chime.toml`, `/etc/chime/chime.toml`, `~/.config/chime/chime.toml`)
//! - Environment variables (`CHIME_PORT`, `CHIME_DISPATCH__NOTIFICATION_SEND_DELAY_SECS`, ...)

use anyhow::{Context, Result};
use chime_core::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config files checked by [`Config::load`], later files override earlier ones.
const CONFIG_PATHS: [&str; 3] = [
    "/etc/chime/chime.toml",
    "~/.config/chime/chime.toml",
    "chime.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Notification dispatch configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Notification dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds of quiet after the last message before a notification is sent.
    #[serde(default = "default_notification_send_delay")]
    pub notification_send_delay_secs: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum chat message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Maximum members per room.
    #[serde(default = "default_max_room_members")]
    pub max_room_members: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Session timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_notification_send_delay() -> u64 {
    60
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_length() -> usize {
    1000
}

fn default_max_room_members() -> usize {
    chime_core::rooms::DEFAULT_MAX_ROOM_MEMBERS
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    90_000 // 90 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dispatch: DispatchConfig::default(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            notification_send_delay_secs: default_notification_send_delay(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            max_room_members: default_max_room_members(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default file locations and `CHIME_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            builder = builder.add_source(
                config::File::new(expanded.as_ref(), config::FileFormat::Toml).required(false),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix("CHIME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Heartbeat interval advertised in `connected` frames, clamped to `u32`.
    #[must_use]
    pub fn heartbeat_hint_ms(&self) -> u32 {
        u32::try_from(self.heartbeat.interval_ms).unwrap_or(u32::MAX)
    }

    /// Dispatcher settings derived from this configuration.
    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            notification_send_delay: Duration::from_secs(self.dispatch.notification_send_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.dispatch.notification_send_delay_secs, 60);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(
            config.dispatcher().notification_send_delay,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [dispatch]
            notification_send_delay_secs = 5

            [limits]
            max_message_length = 200
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.dispatch.notification_send_delay_secs, 5);
        assert_eq!(config.limits.max_message_length, 200);
        assert_eq!(config.limits.max_room_members, 100);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_heartbeat_hint_clamps() {
        let mut config = Config::default();
        assert_eq!(config.heartbeat_hint_ms(), 30_000);

        config.heartbeat.interval_ms = u64::from(u32::MAX) + 1;
        assert_eq!(config.heartbeat_hint_ms(), u32::MAX);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(Config::from_file("/definitely/not/here/chime.toml").is_err());
    }
}
