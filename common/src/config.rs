// Configuration management with layered configuration (file, env)

use crate::errors::ValidationError;
use crate::models::MonitorDefinition;
use crate::monitoring::MonitoringConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Static device declarations served by the in-memory registry
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub quiet_period_ms: u64,
    pub idle_poll_interval_ms: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1000,
            idle_poll_interval_ms: 100,
        }
    }
}

impl MonitoringSettings {
    pub fn to_monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            quiet_period: Duration::from_millis(self.quiet_period_ms),
            idle_poll_interval: Duration::from_millis(self.idle_poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network: String,
    /// Listener key covering this device; registering the key registers
    /// every device that declares it
    #[serde(default)]
    pub listener: Option<String>,
    #[serde(default = "default_listening")]
    pub listening: bool,
    #[serde(default)]
    pub monitors: Vec<MonitorDefinition>,
}

fn default_listening() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("MONITOR")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.monitoring.quiet_period_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "monitoring.quiet_period_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.monitoring.idle_poll_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "monitoring.idle_poll_interval_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.observability.log_level.is_empty() {
            return Err(ValidationError::MissingField(
                "observability.log_level".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.is_empty() {
                return Err(ValidationError::MissingField("devices[].id".to_string()));
            }
            if !ids.insert(device.id.as_str()) {
                return Err(ValidationError::ConstraintViolation(format!(
                    "Duplicate device id '{}'",
                    device.id
                )));
            }
        }

        Ok(())
    }
}
