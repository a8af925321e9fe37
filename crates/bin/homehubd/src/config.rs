//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `homehub.toml` in the working directory, or the file named by
//! `HOMEHUB_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use homehub_app::event_bus::EventBus;
use homehub_app::pool::PoolConfig;
use homehub_app::processor::ProcessorConfig;
use homehub_app::system::SystemConfig;

const DEFAULT_PATH: &str = "homehub.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processor: ProcessorSection,
    pub pool: PoolSection,
    pub events: EventsSection,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub integrations: IntegrationsConfig,
}

/// Command intake and dispatch timeouts.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProcessorSection {
    /// Commands buffered before new ones are refused as overloaded.
    pub intake_capacity: usize,
    pub acquire_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

/// Hub connection pools.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Pool size given to hubs created by the daemon itself.
    pub default_capacity: usize,
    pub dial_timeout_ms: u64,
    /// How long shutdown waits for borrowed connections.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Events a subscriber may fall behind before it starts losing them.
    pub buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON document holding the home and its recipes.
    pub path: PathBuf,
}

/// Per-integration toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Enable the simulated hubs, and seed a demo home into an empty store.
    pub virtual_enabled: bool,
    pub lutron_enabled: bool,
    pub fluxwifi_enabled: bool,
}

impl Config {
    /// Load configuration from `homehub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HOMEHUB_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("HOMEHUB_STORE") {
            self.storage.path = PathBuf::from(val);
        }
        if let Some(val) = var("HOMEHUB_INTAKE_CAPACITY")
            && let Ok(capacity) = val.parse()
        {
            self.processor.intake_capacity = capacity;
        }
        if let Some(val) = var("HOMEHUB_VIRTUAL")
            && let Ok(enabled) = val.parse()
        {
            self.integrations.virtual_enabled = enabled;
        }
        if let Some(val) = var("HOMEHUB_LUTRON")
            && let Ok(enabled) = val.parse()
        {
            self.integrations.lutron_enabled = enabled;
        }
        if let Some(val) = var("HOMEHUB_FLUXWIFI")
            && let Ok(enabled) = val.parse()
        {
            self.integrations.fluxwifi_enabled = enabled;
        }
        if let Some(val) = var("HOMEHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.intake_capacity == 0 {
            return Err(ConfigError::Validation(
                "processor.intake_capacity must be non-zero".to_string(),
            ));
        }
        if self.processor.acquire_timeout_ms == 0 || self.processor.write_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "processor timeouts must be non-zero".to_string(),
            ));
        }
        if self.pool.default_capacity == 0 {
            return Err(ConfigError::Validation(
                "pool.default_capacity must be non-zero".to_string(),
            ));
        }
        if self.events.buffer == 0 {
            return Err(ConfigError::Validation(
                "events.buffer must be non-zero".to_string(),
            ));
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Tunables handed to the core.
    #[must_use]
    pub fn system(&self) -> SystemConfig {
        SystemConfig {
            processor: ProcessorConfig {
                intake_capacity: self.processor.intake_capacity,
                acquire_timeout: Duration::from_millis(self.processor.acquire_timeout_ms),
                write_timeout: Duration::from_millis(self.processor.write_timeout_ms),
            },
            pool: PoolConfig {
                dial_timeout: Duration::from_millis(self.pool.dial_timeout_ms),
                shutdown_grace: Duration::from_millis(self.pool.shutdown_grace_ms),
            },
            event_buffer: self.events.buffer,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl Default for ProcessorSection {
    fn default() -> Self {
        let defaults = ProcessorConfig::default();
        Self {
            intake_capacity: defaults.intake_capacity,
            acquire_timeout_ms: millis(defaults.acquire_timeout),
            write_timeout_ms: millis(defaults.write_timeout),
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            default_capacity: 2,
            dial_timeout_ms: millis(defaults.dial_timeout),
            shutdown_grace_ms: millis(defaults.shutdown_grace),
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            buffer: EventBus::DEFAULT_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homehubd=info,homehub_app=info,homehub_adapter_lutron=info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("homehub.json"),
        }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
            lutron_enabled: true,
            fluxwifi_enabled: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn should_produce_core_defaults() {
        let config = Config::default();
        assert_eq!(config.system(), SystemConfig::default());
        assert_eq!(config.storage.path, PathBuf::from("homehub.json"));
        assert!(config.integrations.virtual_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.processor.intake_capacity, 256);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [processor]
            intake_capacity = 16
            acquire_timeout_ms = 500
            write_timeout_ms = 750

            [pool]
            default_capacity = 4
            dial_timeout_ms = 1000
            shutdown_grace_ms = 2000

            [events]
            buffer = 32

            [logging]
            filter = 'debug'

            [storage]
            path = '/var/lib/homehub/home.json'

            [integrations]
            virtual_enabled = false
            lutron_enabled = true
            fluxwifi_enabled = false
        ";
        let config: Config = toml::from_str(toml).unwrap();
        let system = config.system();
        assert_eq!(system.processor.intake_capacity, 16);
        assert_eq!(system.processor.acquire_timeout, Duration::from_millis(500));
        assert_eq!(system.processor.write_timeout, Duration::from_millis(750));
        assert_eq!(system.pool.dial_timeout, Duration::from_secs(1));
        assert_eq!(system.pool.shutdown_grace, Duration::from_secs(2));
        assert_eq!(system.event_buffer, 32);
        assert_eq!(config.pool.default_capacity, 4);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/homehub/home.json"));
        assert!(!config.integrations.virtual_enabled);
        assert!(!config.integrations.fluxwifi_enabled);
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let toml = "
            [processor]
            intake_capacity = 8
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.processor.intake_capacity, 8);
        assert_eq!(config.processor.write_timeout_ms, 5000);
        assert_eq!(config.pool.dial_timeout_ms, 3000);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.events.buffer, EventBus::DEFAULT_CAPACITY);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homehub.toml");
        std::fs::write(&path, "invalid {{{").unwrap();
        let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn should_apply_overrides_over_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HOMEHUB_STORE", "/tmp/home.json"),
            ("HOMEHUB_INTAKE_CAPACITY", "12"),
            ("HOMEHUB_LUTRON", "false"),
            ("HOMEHUB_LOG", "homehubd=trace"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.storage.path, PathBuf::from("/tmp/home.json"));
        assert_eq!(config.processor.intake_capacity, 12);
        assert!(!config.integrations.lutron_enabled);
        assert_eq!(config.logging.filter, "homehubd=trace");
    }

    #[test]
    fn should_prefer_rust_log_over_homehub_log() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "HOMEHUB_LOG" => Some("info".to_string()),
            "RUST_LOG" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn should_ignore_unparsable_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "HOMEHUB_INTAKE_CAPACITY").then(|| "many".to_string()));
        assert_eq!(config.processor.intake_capacity, 256);
    }

    #[test]
    fn should_reject_zero_intake_capacity() {
        let mut config = Config::default();
        config.processor.intake_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_timeouts() {
        let mut config = Config::default();
        config.processor.write_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_empty_store_path() {
        let mut config = Config::default();
        config.storage.path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
