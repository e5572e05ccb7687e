// In-memory device registry and log-only endpoint updater
//
// Backs the standalone binary and end-to-end tests. Production deployments
// plug their own device model and protocol layer into the same traits.

use crate::config::DeviceConfig;
use crate::errors::MonitoringError;
use crate::models::{
    DeviceId, MonitorDefinition, MonitoredDevice, NetworkContext, PointRef, RegistrationItem,
};
use crate::monitoring::{DeviceModel, DeviceResolver, EndpointUpdater, ListeningCallback, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
struct DeviceEntry {
    name: String,
    network: NetworkContext,
    listener: Option<String>,
    listening: bool,
    monitors: Vec<MonitorDefinition>,
}

struct Subscriber {
    token: u64,
    callback: ListeningCallback,
}

#[derive(Default)]
struct RegistryInner {
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
    subscribers: Mutex<HashMap<DeviceId, Vec<Subscriber>>>,
    next_token: AtomicU64,
}

impl RegistryInner {
    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<DeviceId, Vec<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Device model held in memory, keyed by device id
#[derive(Clone, Default)]
pub struct InMemoryDeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from static device declarations
    pub fn from_configs(configs: &[DeviceConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            registry.upsert_device(config.clone());
        }
        registry
    }

    /// Insert or replace a device declaration
    pub fn upsert_device(&self, config: DeviceConfig) {
        let entry = DeviceEntry {
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name
            },
            network: NetworkContext::new(config.network),
            listener: config.listener,
            listening: config.listening,
            monitors: config.monitors,
        };
        self.inner
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.id, entry);
    }

    /// Flip a device's listening flag, notifying subscribers on change
    pub fn set_listening(&self, device_id: &str, listening: bool) -> Result<(), MonitoringError> {
        let changed = {
            let mut devices = self
                .inner
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let entry = devices
                .get_mut(device_id)
                .ok_or_else(|| MonitoringError::DeviceNotFound(device_id.to_string()))?;
            let changed = entry.listening != listening;
            entry.listening = listening;
            changed
        };

        if changed {
            let callbacks: Vec<ListeningCallback> = self
                .inner
                .lock_subscribers()
                .get(device_id)
                .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
                .unwrap_or_default();
            debug!(device_id, listening, subscribers = callbacks.len(), "Notifying listeners");
            for callback in callbacks {
                callback(listening);
            }
        }
        Ok(())
    }

    /// Replace a device's monitor definitions. Takes effect on its next rebuild.
    pub fn set_monitors(
        &self,
        device_id: &str,
        monitors: Vec<MonitorDefinition>,
    ) -> Result<(), MonitoringError> {
        let mut devices = self
            .inner
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = devices
            .get_mut(device_id)
            .ok_or_else(|| MonitoringError::DeviceNotFound(device_id.to_string()))?;
        entry.monitors = monitors;
        Ok(())
    }

    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.inner
            .lock_subscribers()
            .get(device_id)
            .map_or(0, Vec::len)
    }

    pub fn device_count(&self) -> usize {
        self.inner
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl DeviceResolver for InMemoryDeviceRegistry {
    /// A key naming a device resolves to that device; otherwise it resolves
    /// to every device declaring it as listener key.
    async fn resolve(
        &self,
        item: &RegistrationItem,
    ) -> Result<Vec<MonitoredDevice>, MonitoringError> {
        let devices = self
            .inner
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let to_record = |id: &DeviceId, entry: &DeviceEntry| MonitoredDevice {
            id: id.clone(),
            name: entry.name.clone(),
            listening: entry.listening,
            monitor_definitions: entry.monitors.clone(),
            network: entry.network.clone(),
            registration: item.clone(),
        };

        if let Some(entry) = devices.get(&item.key) {
            return Ok(vec![to_record(&item.key, entry)]);
        }

        let mut covered: Vec<MonitoredDevice> = devices
            .iter()
            .filter(|(_, entry)| entry.listener.as_deref() == Some(item.key.as_str()))
            .map(|(id, entry)| to_record(id, entry))
            .collect();
        covered.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(covered)
    }
}

impl DeviceModel for InMemoryDeviceRegistry {
    fn is_listening(&self, device_id: &str) -> bool {
        self.inner
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .is_some_and(|entry| entry.listening)
    }

    fn on_listening_changed(&self, device_id: &str, callback: ListeningCallback) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock_subscribers()
            .entry(device_id.to_string())
            .or_default()
            .push(Subscriber { token, callback });

        let inner = Arc::downgrade(&self.inner);
        let device_id = device_id.to_string();
        Subscription::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut subscribers = inner.lock_subscribers();
            if let Some(subs) = subscribers.get_mut(&device_id) {
                subs.retain(|s| s.token != token);
                if subs.is_empty() {
                    subscribers.remove(&device_id);
                }
            }
        })
    }
}

/// Endpoint updater that only logs what a protocol layer would do
#[derive(Debug, Default)]
pub struct LoggingEndpointUpdater {
    updates: AtomicU64,
}

impl LoggingEndpointUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EndpointUpdater for LoggingEndpointUpdater {
    #[instrument(skip_all, fields(device_id = %device.id))]
    async fn ensure_resources_exist(
        &self,
        device: &MonitoredDevice,
        children: &[PointRef],
    ) -> Result<(), MonitoringError> {
        info!(
            device_name = %device.name,
            points = children.len(),
            "Ensuring endpoint resources exist"
        );
        Ok(())
    }

    async fn update_endpoints(
        &self,
        device: &MonitoredDevice,
        network: &NetworkContext,
        children: &[PointRef],
    ) -> Result<(), MonitoringError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        debug!(
            device_id = %device.id,
            network = %network.id,
            points = ?children.iter().map(PointRef::id).collect::<Vec<_>>(),
            "Endpoints updated"
        );
        Ok(())
    }
}
