// At-most-once resource setup per (device, interval)

use crate::errors::MonitoringError;
use crate::telemetry;
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Tracks which `(device_id, interval)` pairs already ran their setup step.
///
/// A key is marked before setup starts and stays marked even if setup fails.
/// Only a process restart clears it.
#[derive(Debug, Default)]
pub struct InitializationGuard {
    initialized: Mutex<HashSet<(String, u64)>>,
}

impl InitializationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `setup` unless this key has been seen before.
    ///
    /// Returns `true` when `setup` was invoked by this call.
    pub async fn ensure_initialized<F, Fut>(&self, device_id: &str, interval: u64, setup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), MonitoringError>>,
    {
        let first = self
            .initialized
            .lock()
            .await
            .insert((device_id.to_string(), interval));

        if !first {
            return false;
        }

        debug!(device_id, interval_ms = interval, "Running one-time resource setup");
        if let Err(e) = setup().await {
            telemetry::record_setup_failure(interval);
            error!(
                device_id,
                interval_ms = interval,
                error = %e,
                "Resource setup failed; not retried until restart"
            );
        }
        true
    }

    pub async fn is_initialized(&self, device_id: &str, interval: u64) -> bool {
        self.initialized
            .lock()
            .await
            .contains(&(device_id.to_string(), interval))
    }
}
