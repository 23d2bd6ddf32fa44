//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - The first TOML file found in the search path
//! - Environment variables (`TETHER_PORT`, `TETHER_AUTH__JWT_SECRET`, ...)

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core::config::DEFAULT_BUS_TOPIC;
use tether_core::HubConfig;

/// Files tried by [`Config::load`], in order.
const CONFIG_PATHS: [&str; 3] = [
    "tether.toml",
    "/etc/tether/tether.toml",
    "~/.config/tether/tether.toml",
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

    #[serde(default)]
    pub transport: TransportConfig,

    /// Queue capacities.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Liveness probing.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Largest inbound frame in bytes. Bigger frames close the connection.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Queue capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-connection outbound queue. Overflow drops the newest message.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// The registry's ordered work queue.
    #[serde(default = "default_queue_capacity")]
    pub hub_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Silence after which a connection is dropped, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Longest a single write may block before the connection is dropped.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Presence and typing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_presence_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_typing_ttl")]
    pub typing_ttl_secs: u64,

    /// How long after the last TYPING_START a user still counts as typing.
    #[serde(default = "default_typing_window")]
    pub typing_window_secs: u64,

    /// Interval of the sweep that drops expired presence and typing keys.
    #[serde(default = "default_sweep")]
    pub sweep_secs: u64,
}

/// Voice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer.
    #[serde(default)]
    pub jwt_secret: String,
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

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_frame_size() -> usize {
    tether_protocol::MAX_FRAME_SIZE
}

fn default_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    54_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_presence_ttl() -> u64 {
    300
}

fn default_typing_ttl() -> u64 {
    10
}

fn default_typing_window() -> u64 {
    5
}

fn default_sweep() -> u64 {
    60
}

fn default_lock_timeout() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            presence: PresenceConfig::default(),
            voice: VoiceConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_queue_capacity(),
            hub_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_presence_ttl(),
            typing_ttl_secs: default_typing_ttl(),
            typing_window_secs: default_typing_window(),
            sweep_secs: default_sweep(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
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

/// The `TETHER_*` environment source. Nested keys use `__`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("TETHER")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load the first config file in the search path, or the defaults, and
    /// apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let base = match Self::find_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        base.with_overrides(environment())
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
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

    /// Layer an environment source over this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an override does not fit its field.
    pub fn with_overrides(self, env: config::Environment) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&self).context("Failed to layer config")?)
            .add_source(env)
            .build()
            .context("Failed to read environment overrides")?;

        layered
            .try_deserialize()
            .context("Invalid environment override")
    }

    /// Check the settings the server cannot start without.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.auth.jwt_secret.is_empty(),
            "auth.jwt_secret must be set (TETHER_AUTH__JWT_SECRET)"
        );
        ensure!(
            self.heartbeat.timeout_ms > self.heartbeat.interval_ms,
            "heartbeat.timeout_ms must exceed heartbeat.interval_ms"
        );
        ensure!(
            self.heartbeat.interval_ms > 0 && self.heartbeat.write_timeout_ms > 0,
            "heartbeat.interval_ms and heartbeat.write_timeout_ms must be positive"
        );
        ensure!(self.presence.sweep_secs > 0, "presence.sweep_secs must be positive");
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        Ok(())
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

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.write_timeout_ms)
    }

    /// The realtime core's settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            hub_queue_capacity: self.limits.hub_queue_capacity,
            presence_ttl: Duration::from_secs(self.presence.ttl_secs),
            typing_ttl: Duration::from_secs(self.presence.typing_ttl_secs),
            typing_window: Duration::from_secs(self.presence.typing_window_secs),
            voice_lock_timeout: Duration::from_millis(self.voice.lock_timeout_ms),
            bus_topic: DEFAULT_BUS_TOPIC.to_string(),
            cache_sweep_interval: Duration::from_secs(self.presence.sweep_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.transport.max_frame_size, 4096);
        assert_eq!(config.limits.outbound_queue_capacity, 256);
        assert!(config.heartbeat.timeout_ms > config.heartbeat.interval_ms);
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [presence]
            typing_window_secs = 3

            [auth]
            jwt_secret = "s3cret"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.presence.typing_window_secs, 3);
        assert_eq!(config.presence.ttl_secs, 300);
        assert_eq!(config.auth.jwt_secret, "s3cret");
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::default()
            .with_overrides(env(&[
                ("TETHER_PORT", "9100"),
                ("TETHER_AUTH__JWT_SECRET", "from-env"),
                ("TETHER_LIMITS__OUTBOUND_QUEUE_CAPACITY", "32"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert_eq!(config.limits.outbound_queue_capacity, 32);
        assert_eq!(config.limits.hub_queue_capacity, 256);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "secret".into();
        config.validate().unwrap();

        config.heartbeat.write_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.heartbeat.write_timeout_ms = 10_000;

        config.heartbeat.timeout_ms = config.heartbeat.interval_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hub_config() {
        let hub = Config::default().hub_config();
        assert_eq!(hub.typing_window, Duration::from_secs(5));
        assert_eq!(hub.voice_lock_timeout, Duration::from_secs(5));
        assert_eq!(hub.bus_topic, "websocket:broadcast");
        assert_eq!(hub.cache_sweep_interval, Duration::from_secs(60));
    }
}
