// Poll bindings and the builder that derives them from resolved devices

use super::batcher::IngestionBatcher;
use super::collaborators::{DeviceModel, EndpointUpdater, Subscription};
use super::guard::InitializationGuard;
use crate::errors::MonitoringError;
use crate::models::{DeviceId, MonitoredDevice, PointRef, RegistrationItem};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument};

/// Body of a poll binding
#[async_trait]
pub trait PollAction: Send + Sync {
    async fn poll(&self) -> Result<(), MonitoringError>;
}

struct FnPollAction<F>(F);

#[async_trait]
impl<F, Fut> PollAction for FnPollAction<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MonitoringError>> + Send + 'static,
{
    async fn poll(&self) -> Result<(), MonitoringError> {
        (self.0)().await
    }
}

/// Pairing of a device and one of its valid monitor definitions
#[derive(Clone)]
pub struct PollBinding {
    device_id: DeviceId,
    interval: u64,
    action: Arc<dyn PollAction>,
}

impl PollBinding {
    pub fn new(device_id: impl Into<DeviceId>, interval: u64, action: Arc<dyn PollAction>) -> Self {
        Self {
            device_id: device_id.into(),
            interval,
            action,
        }
    }

    /// Binding backed by an async closure
    pub fn from_fn<F, Fut>(device_id: impl Into<DeviceId>, interval: u64, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MonitoringError>> + Send + 'static,
    {
        Self::new(device_id, interval, Arc::new(FnPollAction(f)))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub async fn poll(&self) -> Result<(), MonitoringError> {
        self.action.poll().await
    }
}

impl fmt::Debug for PollBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollBinding")
            .field("device_id", &self.device_id)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Poll body that refreshes a device's endpoints.
///
/// Listening state is read through the live model at call time, so a device
/// switched off between scheduling and firing is skipped.
struct EndpointPoll {
    device: Arc<MonitoredDevice>,
    interval: u64,
    children: Vec<PointRef>,
    model: Arc<dyn DeviceModel>,
    updater: Arc<dyn EndpointUpdater>,
    guard: Arc<InitializationGuard>,
}

#[async_trait]
impl PollAction for EndpointPoll {
    async fn poll(&self) -> Result<(), MonitoringError> {
        if self.children.is_empty() || !self.model.is_listening(&self.device.id) {
            return Ok(());
        }

        self.guard
            .ensure_initialized(
                &self.device.id,
                self.interval,
                || self.updater.ensure_resources_exist(&self.device, &self.children),
            )
            .await;

        self.updater
            .update_endpoints(&self.device, &self.device.network, &self.children)
            .await
    }
}

/// Outcome of planning one resolved device
#[derive(Debug)]
pub enum DevicePlan {
    /// Device stopped listening: drop it from every group
    Purge { device_id: DeviceId },
    /// Device is listening: its bindings become exactly `bindings`
    Replace {
        device_id: DeviceId,
        bindings: Vec<PollBinding>,
    },
}

impl DevicePlan {
    pub fn device_id(&self) -> &str {
        match self {
            DevicePlan::Purge { device_id } | DevicePlan::Replace { device_id, .. } => device_id,
        }
    }
}

/// Listening subscription of a device and the registration it re-submits
struct Tracked {
    registration: RegistrationItem,
    subscription: Subscription,
}

/// Builds poll bindings from resolved devices and keeps one listening-change
/// subscription per observed device.
pub struct BindingBuilder {
    model: Arc<dyn DeviceModel>,
    updater: Arc<dyn EndpointUpdater>,
    guard: Arc<InitializationGuard>,
    batcher: Arc<IngestionBatcher>,
    subscriptions: Mutex<HashMap<DeviceId, Tracked>>,
}

impl BindingBuilder {
    pub fn new(
        model: Arc<dyn DeviceModel>,
        updater: Arc<dyn EndpointUpdater>,
        guard: Arc<InitializationGuard>,
        batcher: Arc<IngestionBatcher>,
    ) -> Self {
        Self {
            model,
            updater,
            guard,
            batcher,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Plan every device in arrival order
    #[instrument(skip_all, fields(devices = devices.len()))]
    pub fn plan(&self, devices: Vec<MonitoredDevice>) -> Vec<DevicePlan> {
        devices
            .into_iter()
            .map(|device| {
                self.ensure_subscribed(&device);

                if !device.listening {
                    info!(device_id = %device.id, device_name = %device.name, "Device stopped listening");
                    return DevicePlan::Purge {
                        device_id: device.id,
                    };
                }

                let device = Arc::new(device);
                let bindings = self.bindings_for(&device);
                debug!(
                    device_id = %device.id,
                    bindings = bindings.len(),
                    dropped = device.monitor_definitions.len() - bindings.len(),
                    "Built poll bindings"
                );
                DevicePlan::Replace {
                    device_id: device.id.clone(),
                    bindings,
                }
            })
            .collect()
    }

    fn bindings_for(&self, device: &Arc<MonitoredDevice>) -> Vec<PollBinding> {
        device
            .valid_definitions()
            .filter_map(|def| {
                let interval = def.interval_ms()?;
                let action = EndpointPoll {
                    device: device.clone(),
                    interval,
                    children: def.children.clone(),
                    model: self.model.clone(),
                    updater: self.updater.clone(),
                    guard: self.guard.clone(),
                };
                Some(PollBinding::new(device.id.clone(), interval, Arc::new(action)))
            })
            .collect()
    }

    /// Subscribe to listening changes once per device; a change re-submits
    /// the registration that last resolved the device.
    fn ensure_subscribed(&self, device: &MonitoredDevice) {
        let replaced = {
            let mut subscriptions = self.lock_subscriptions();
            if subscriptions
                .get(&device.id)
                .is_some_and(|tracked| tracked.registration.key == device.registration.key)
            {
                return;
            }

            let batcher = Arc::downgrade(&self.batcher);
            let registration = device.registration.clone();
            let device_id = device.id.clone();
            let subscription = self.model.on_listening_changed(
                &device.id,
                Arc::new(move |listening| {
                    info!(device_id = %device_id, listening, "Listening state changed");
                    if let Some(batcher) = batcher.upgrade() {
                        batcher.submit(registration.clone());
                    }
                }),
            );
            subscriptions.insert(
                device.id.clone(),
                Tracked {
                    registration: device.registration.clone(),
                    subscription,
                },
            )
        };

        if let Some(previous) = replaced {
            debug!(
                device_id = %device.id,
                from = %previous.registration,
                to = %device.registration,
                "Device moved to another registration"
            );
            previous.subscription.unsubscribe();
        }
    }

    /// Release devices that `registration` owned but no longer resolves to.
    ///
    /// Returns the released device ids so their bindings can be purged.
    pub fn release_unresolved(
        &self,
        registration: &RegistrationItem,
        resolved: &HashSet<DeviceId>,
    ) -> Vec<DeviceId> {
        let released: Vec<(DeviceId, Tracked)> = {
            let mut subscriptions = self.lock_subscriptions();
            let stale: Vec<DeviceId> = subscriptions
                .iter()
                .filter(|(id, tracked)| {
                    tracked.registration.key == registration.key && !resolved.contains(*id)
                })
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| subscriptions.remove(&id).map(|tracked| (id, tracked)))
                .collect()
        };

        released
            .into_iter()
            .map(|(device_id, tracked)| {
                info!(device_id = %device_id, registration = %registration, "Device no longer resolved, releasing");
                tracked.subscription.unsubscribe();
                device_id
            })
            .collect()
    }

    /// Release the listening subscription of a device
    pub fn unsubscribe(&self, device_id: &str) -> bool {
        // Drop outside the lock so the model's cancel hook runs unguarded
        let removed = self.lock_subscriptions().remove(device_id);
        removed
            .map(|tracked| tracked.subscription.unsubscribe())
            .is_some()
    }

    pub fn is_subscribed(&self, device_id: &str) -> bool {
        self.lock_subscriptions().contains_key(device_id)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<DeviceId, Tracked>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
