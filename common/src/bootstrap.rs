// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::models::RegistrationItem;
use crate::monitoring::MonitoringScheduler;
use crate::registry::{InMemoryDeviceRegistry, LoggingEndpointUpdater};
use crate::telemetry;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Wired scheduler plus handles on its in-memory collaborators
pub struct MonitorRuntime {
    pub scheduler: Arc<MonitoringScheduler>,
    pub registry: InMemoryDeviceRegistry,
    pub updater: Arc<LoggingEndpointUpdater>,
}

/// Initialize logging and, when configured, the metrics exporter
///
/// # Errors
/// Returns error if the subscriber or exporter cannot be installed
pub fn init_observability(settings: &Settings) -> Result<()> {
    telemetry::init_logging(&settings.observability).context("Failed to initialize logging")?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port).context("Failed to initialize metrics exporter")?;
    }
    Ok(())
}

/// Build a scheduler over the statically configured devices
#[tracing::instrument(skip(settings))]
pub fn init_monitor_runtime(settings: &Settings) -> Result<MonitorRuntime> {
    settings
        .validate()
        .context("Invalid monitoring configuration")?;

    let registry = InMemoryDeviceRegistry::from_configs(&settings.devices);
    let updater = Arc::new(LoggingEndpointUpdater::new());
    let scheduler = Arc::new(MonitoringScheduler::new(
        settings.monitoring.to_monitoring_config(),
        Arc::new(registry.clone()),
        Arc::new(registry.clone()),
        updater.clone(),
    ));

    info!(
        devices = registry.device_count(),
        "Monitoring runtime initialized"
    );
    Ok(MonitorRuntime {
        scheduler,
        registry,
        updater,
    })
}

/// Registrations for the configured devices: one per listener key, plus one
/// per device without a listener, in declaration order.
pub fn initial_registrations(settings: &Settings) -> Vec<RegistrationItem> {
    let mut seen = HashSet::new();
    settings
        .devices
        .iter()
        .map(|device| device.listener.clone().unwrap_or_else(|| device.id.clone()))
        .filter(|key| seen.insert(key.clone()))
        .map(RegistrationItem::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn device(id: &str, listener: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            id: id.to_string(),
            name: String::new(),
            network: String::new(),
            listener: listener.map(str::to_string),
            listening: true,
            monitors: vec![],
        }
    }

    #[test]
    fn test_initial_registrations_group_by_listener() {
        let settings = Settings {
            devices: vec![
                device("vav-1", Some("floor-1")),
                device("ahu-1", None),
                device("vav-2", Some("floor-1")),
            ],
            ..Default::default()
        };

        let keys: Vec<String> = initial_registrations(&settings)
            .into_iter()
            .map(|item| item.key)
            .collect();
        assert_eq!(keys, vec!["floor-1", "ahu-1"]);
    }

    #[test]
    fn test_runtime_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.monitoring.quiet_period_ms = 0;
        assert!(init_monitor_runtime(&settings).is_err());
    }

    #[test]
    fn test_runtime_loads_registry() {
        let settings = Settings {
            devices: vec![device("ahu-1", None)],
            ..Default::default()
        };
        let runtime = init_monitor_runtime(&settings).unwrap();
        assert_eq!(runtime.registry.device_count(), 1);
        assert_eq!(runtime.scheduler.pending_registrations(), 0);
    }
}
