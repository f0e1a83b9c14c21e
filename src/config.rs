//! # Configuration Management
//!
//! Centralized configuration for the session client.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Environment variables (`WA_PROTOCOL_*`) via `from_env()`
//! - Direct instantiation with defaults, optionally through `default_with_overrides()`
//!
//! Durations are written as milliseconds. `response_timeout` is off unless
//! set; pending requests then wait until answered or the connection ends.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Socket endpoint of the web client.
pub const DEFAULT_ENDPOINT: &str = "wss://web.whatsapp.com/ws";

/// `Origin` header the endpoint expects.
pub const DEFAULT_ORIGIN: &str = "https://web.whatsapp.com";

/// Client version announced in `init`.
pub const CLIENT_VERSION: [u32; 3] = [0, 3, 2846];

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Session client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("WA_PROTOCOL_ENDPOINT") {
            config.client.endpoint = endpoint;
        }

        if let Ok(origin) = std::env::var("WA_PROTOCOL_ORIGIN") {
            config.client.origin = origin;
        }

        if let Ok(heartbeat) = std::env::var("WA_PROTOCOL_HEARTBEAT_INTERVAL_MS") {
            let val = heartbeat.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid WA_PROTOCOL_HEARTBEAT_INTERVAL_MS: {e}"))
            })?;
            config.client.heartbeat_interval = Duration::from_millis(val);
        }

        if let Ok(timeout) = std::env::var("WA_PROTOCOL_RESPONSE_TIMEOUT_MS") {
            let val = timeout.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid WA_PROTOCOL_RESPONSE_TIMEOUT_MS: {e}"))
            })?;
            config.client.response_timeout = (val > 0).then(|| Duration::from_millis(val));
        }

        if let Ok(level) = std::env::var("WA_PROTOCOL_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid WA_PROTOCOL_LOG_LEVEL: {level}"))
            })?;
        }

        if let Ok(json) = std::env::var("WA_PROTOCOL_LOG_JSON") {
            config.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Session client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub endpoint: String,

    /// Value of the `Origin` header
    pub origin: String,

    /// Interval between `?,,` heartbeats
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// How long a request may wait for its response. `None` waits indefinitely.
    #[serde(
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_timeout: Option<Duration>,

    /// Protocol version sent with `init`
    pub client_version: [u32; 3],

    /// Device description sent with `init` (operating system, browser)
    pub platform: Vec<String>,

    /// Whether `init` announces that the client can resume sessions
    pub reconnect_capable: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from(DEFAULT_ENDPOINT),
            origin: String::from(DEFAULT_ORIGIN),
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            response_timeout: None,
            client_version: CLIENT_VERSION,
            platform: vec![String::from("Linux"), String::from("NodeJS")],
            reconnect_capable: true,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.endpoint.is_empty() {
            errors.push("Endpoint cannot be empty".to_string());
        } else if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            errors.push(format!(
                "Invalid endpoint: '{}' (expected a ws:// or wss:// URL)",
                self.endpoint
            ));
        }

        if self.origin.is_empty() {
            errors.push("Origin cannot be empty".to_string());
        } else if !self.origin.starts_with("http://") && !self.origin.starts_with("https://") {
            errors.push(format!(
                "Invalid origin: '{}' (expected an http:// or https:// URL)",
                self.origin
            ));
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if let Some(response_timeout) = self.response_timeout {
            if response_timeout.as_millis() < 100 {
                errors.push("Response timeout too short (minimum: 100ms)".to_string());
            }
        }

        if self.platform.len() != 2 || self.platform.iter().any(|p| p.is_empty()) {
            errors.push(
                "Platform must name exactly two non-empty entries (os, browser)".to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("wa-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional durations; a value of 0 reads as unset
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.filter(|&m| m > 0).map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
