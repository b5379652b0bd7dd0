//! Configuration for bridge daemons
//!
//! Settings are loaded once at process start (TOML file, then environment
//! overrides) and passed down explicitly through the `App`; there is no global
//! settings singleton.

use crate::topics::validate_segment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Framework settings shared by every bridge daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[app]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSection {
    /// Overrides the name given to `App::new`
    pub name: Option<String>,
    /// Topic prefix; falls back to the app name when unset
    pub prefix: Option<String>,
    /// Version reported in heartbeats; falls back to the version given to `App::new`
    pub version: Option<String>,
    /// Heartbeat period in seconds, `0` disables periodic heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Swap adapters for their dry-run variants
    #[serde(default)]
    pub dry_run: bool,
}

fn default_heartbeat_interval() -> u64 {
    60
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            prefix: None,
            version: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            dry_run: false,
        }
    }
}

impl AppSection {
    /// Heartbeat period, `None` when disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// `[mqtt]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://` or `mqtts://`
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Client identifier; a random suffix is appended to avoid broker conflicts
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Reconnect delays in milliseconds, the last value is sustained
    #[serde(default = "default_backoff")]
    pub reconnect_backoff_ms: Vec<u64>,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_backoff() -> Vec<u64> {
    vec![500, 1000, 2000, 5000, 10000]
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_backoff_ms: default_backoff(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json`, `pretty` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub spans: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            spans: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// User settings types expose the framework settings they extend.
///
/// The provider map registers both the user type and the base [`Settings`], so a
/// handler may ask for either.
pub trait AppSettings: Send + Sync + 'static {
    fn base(&self) -> &Settings;
}

impl AppSettings for Settings {
    fn base(&self) -> &Settings {
        self
    }
}

impl Settings {
    /// Load settings from a TOML file and apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_toml_str(&content)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `BRIDGEKIT_*` and `LOG_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BRIDGEKIT_MQTT_BROKER_URL") {
            self.mqtt.broker_url = url;
        }
        if let Some(prefix) = lookup("BRIDGEKIT_PREFIX") {
            self.app.prefix = Some(prefix);
        }
        if let Some(dry_run) = lookup("BRIDGEKIT_DRY_RUN") {
            self.app.dry_run = matches!(dry_run.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(spans) = lookup("LOG_SPANS") {
            self.logging.spans = spans.to_lowercase() == "true";
        }
    }

    /// Validate values that cannot be expressed in the serde schema
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.app.name {
            validate_segment(name).map_err(|reason| {
                ConfigError::InvalidConfig(format!("app.name '{name}': {reason}"))
            })?;
        }
        if let Some(prefix) = &self.app.prefix {
            validate_segment(prefix).map_err(|reason| {
                ConfigError::InvalidConfig(format!("app.prefix '{prefix}': {reason}"))
            })?;
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get MQTT username from environment variable
    pub fn mqtt_username(&self) -> Option<String> {
        self.mqtt
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT password from environment variable
    pub fn mqtt_password(&self) -> Option<String> {
        self.mqtt
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}
