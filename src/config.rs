//! Configuration
//!
//! Loaded from a TOML file (`~/.config/chargelink/config.toml` by default,
//! overridable with `CHARGELINK_CONFIG`). Every section has working
//! defaults so a missing file only costs a warning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::DispatchConfig;
use crate::session::SessionPolicy;
use crate::telemetry::OverflowPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub ocpp: OcppSettings,
    pub telemetry: TelemetrySettings,
    pub influxdb: InfluxSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcppSettings {
    /// Heartbeat interval advertised in BootNotification responses, seconds.
    pub heartbeat_interval: u32,
    /// Response window for server-initiated calls, seconds.
    pub call_timeout: u64,
    /// What to do when an identity connects twice.
    pub session_policy: SessionPolicy,
}

impl Default for OcppSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            call_timeout: 30,
            session_policy: SessionPolicy::EvictOld,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Bounded write-queue capacity, in points.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxSettings {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8086".to_string(),
            org: "chargelink".to_string(),
            bucket: "ocpp".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `host:port` the OCPP listener binds.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            heartbeat_interval: self.ocpp.heartbeat_interval,
            call_timeout: Duration::from_secs(self.ocpp.call_timeout),
        }
    }
}

/// `~/.config/chargelink/config.toml`, falling back to the working
/// directory when no config dir exists.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chargelink")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.address(), "0.0.0.0:9000");
        assert_eq!(config.ocpp.heartbeat_interval, 300);
        assert_eq!(config.ocpp.session_policy, SessionPolicy::EvictOld);
        assert_eq!(config.telemetry.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9100

            [ocpp]
            heartbeat_interval = 120
            call_timeout = 10
            session_policy = "reject-new"

            [telemetry]
            queue_capacity = 64
            overflow = "drop"

            [influxdb]
            url = "http://influx:8086"
            org = "acme"
            bucket = "ev"
            token = "secret"

            [logging]
            level = "debug"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.address(), "127.0.0.1:9100");
        assert_eq!(config.ocpp.session_policy, SessionPolicy::RejectNew);
        assert_eq!(config.telemetry.overflow, OverflowPolicy::Drop);
        assert_eq!(config.influxdb.bucket, "ev");
        assert_eq!(
            config.dispatch_config().call_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: AppConfig = toml::from_str("[server]\nport = 9001\n").unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.ocpp.heartbeat_interval, 300);
        assert_eq!(config.telemetry.queue_capacity, 1024);
    }
}
