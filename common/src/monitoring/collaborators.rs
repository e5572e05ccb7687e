// Collaborator seams consumed by the monitoring core
//
// Resolution of registrations, the live device model and the endpoint
// protocol layer all live outside this crate and are injected here.

use crate::errors::MonitoringError;
use crate::models::{MonitoredDevice, NetworkContext, PointRef, RegistrationItem};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Callback fired with the new listening value when a device toggles monitoring
pub type ListeningCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Turns one raw registration into zero or more concrete devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    /// Resolve a registration. A listener registration may expand to several
    /// devices; an unknown registration legitimately resolves to none.
    async fn resolve(
        &self,
        item: &RegistrationItem,
    ) -> Result<Vec<MonitoredDevice>, MonitoringError>;
}

/// Live read accessors of the device model
#[cfg_attr(test, mockall::automock)]
pub trait DeviceModel: Send + Sync {
    /// Current listening flag, read at poll time rather than at build time
    fn is_listening(&self, device_id: &str) -> bool;

    /// Register for listening-state changes of a device
    fn on_listening_changed(&self, device_id: &str, callback: ListeningCallback) -> Subscription;
}

/// Protocol-side operations invoked by poll bindings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointUpdater: Send + Sync {
    /// Make sure the endpoints behind `children` exist before the first poll
    async fn ensure_resources_exist(
        &self,
        device: &MonitoredDevice,
        children: &[PointRef],
    ) -> Result<(), MonitoringError>;

    /// Read the current values of `children` from the device
    async fn update_endpoints(
        &self,
        device: &MonitoredDevice,
        network: &NetworkContext,
        children: &[PointRef],
    ) -> Result<(), MonitoringError>;
}

/// Handle to a listening-change notification.
///
/// Dropping the handle, or calling [`Subscription::unsubscribe`], cancels
/// the notification.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when released
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancel the notification now
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
