//! # Configuration Management
//!
//! Centralized configuration for the datagram messenger.
//!
//! This module provides structured configuration for the reassembly buffer,
//! keep-alive and custodian timers, dispatch mode and logging, along with the
//! wire constants every implementation of the frame format must share.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Timer Considerations
//! - The keep-alive expiration (2 minutes) is longer than common NAT idle
//!   timeouts so that a live peer is never evicted between pings
//! - The custodian interval should be well below the expiration

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Magic value that starts every frame (little-endian i32 on the wire)
pub const FRAME_DELIMITER: i32 = 948_724_593;

/// Size of the frame header: delimiter(4) + gross size(4) + crc16(2)
pub const FRAME_HEADER_SIZE: usize = 10;

/// Type tag marking a raw byte passthrough frame body
pub const BYTES_TYPE_TAG: &str = "byte[]";

/// Largest payload a single UDP datagram can carry; every read gets this
/// much room so the socket never truncates a datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Default initial size of the reassembly buffer (16 KB)
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 16 * 1024;

/// Default hard maximum of the reassembly buffer (1 MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default growth rate applied when a buffer needs to grow
pub const DEFAULT_BUFFER_GROWTH_RATE: f64 = 0.2;

/// Default interval between keep-alive pings
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Default idle time after which a context is evicted
pub const DEFAULT_KEEPALIVE_EXPIRATION: Duration = Duration::from_secs(120);

/// Default interval between custodian sweeps
pub const DEFAULT_CUSTODIAN_INTERVAL: Duration = Duration::from_secs(10);

/// Main messenger configuration containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MessengerConfig {
    /// Frame reassembly buffer configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Keep-alive and custodian configuration
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    /// Dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MessengerConfig {
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

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("DATAGRAM_MESSENGER_MAX_BUFFER_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.buffer.max_size = val;
            }
        }

        if let Ok(interval) = std::env::var("DATAGRAM_MESSENGER_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.keep_alive.interval = Duration::from_millis(val);
            }
        }

        if let Ok(expiration) = std::env::var("DATAGRAM_MESSENGER_KEEPALIVE_EXPIRATION_MS") {
            if let Ok(val) = expiration.parse::<u64>() {
                config.keep_alive.expiration = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("DATAGRAM_MESSENGER_CUSTODIAN_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.keep_alive.custodian_interval = Duration::from_millis(val);
            }
        }

        if let Ok(asynchronous) = std::env::var("DATAGRAM_MESSENGER_ASYNC_DISPATCH") {
            if let Ok(val) = asynchronous.parse::<bool>() {
                config.dispatch.asynchronous = val;
            }
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
        errors.extend(self.buffer.validate());
        errors.extend(self.keep_alive.validate());
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

/// Frame reassembly buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Initial size of the accumulator
    pub initial_size: usize,

    /// Hard maximum of the accumulator; a frame larger than this is fatal
    pub max_size: usize,

    /// Fraction by which a buffer grows when it runs out of room
    pub growth_rate: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_size: DEFAULT_MAX_BUFFER_SIZE,
            growth_rate: DEFAULT_BUFFER_GROWTH_RATE,
        }
    }
}

impl BufferConfig {
    /// Validate buffer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.initial_size < FRAME_HEADER_SIZE {
            errors.push(format!(
                "Initial buffer size too small: {} (minimum: {FRAME_HEADER_SIZE} bytes)",
                self.initial_size
            ));
        }

        if self.max_size < self.initial_size {
            errors.push("Max buffer size cannot be smaller than the initial size".to_string());
        } else if self.max_size > i32::MAX as usize {
            errors.push(format!(
                "Max buffer size too large: {} bytes (frame sizes are 32-bit)",
                self.max_size
            ));
        }

        if !(self.growth_rate > 0.0 && self.growth_rate <= 4.0) {
            errors.push(format!(
                "Invalid buffer growth rate: {} (valid range: (0, 4])",
                self.growth_rate
            ));
        }

        errors
    }
}

/// Keep-alive and custodian configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepAliveConfig {
    /// Interval between keep-alive pings sent by listening contexts
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Idle time after which the custodian evicts a context
    #[serde(with = "duration_serde")]
    pub expiration: Duration,

    /// Interval between custodian sweeps
    #[serde(with = "duration_serde")]
    pub custodian_interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            expiration: DEFAULT_KEEPALIVE_EXPIRATION,
            custodian_interval: DEFAULT_CUSTODIAN_INTERVAL,
        }
    }
}

impl KeepAliveConfig {
    /// Validate keep-alive configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 10 {
            errors.push("Keep-alive interval too short (minimum: 10ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.expiration <= self.interval {
            errors.push(
                "Keep-alive expiration must be longer than the keep-alive interval".to_string(),
            );
        }

        if self.custodian_interval.as_millis() < 10 {
            errors.push("Custodian interval too short (minimum: 10ms)".to_string());
        } else if self.custodian_interval > self.expiration {
            errors.push(
                "Custodian interval should not exceed the keep-alive expiration".to_string(),
            );
        }

        errors
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Run handlers and the fallback on the worker pool instead of the receive task
    pub asynchronous: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { asynchronous: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
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
            app_name: String::from("datagram-messenger"),
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
