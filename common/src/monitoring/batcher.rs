// Ingestion batcher that coalesces bursty registration requests

use crate::models::RegistrationItem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::debug;

/// Accumulates registrations and signals readiness once submissions go quiet.
///
/// `submit` never blocks and never rejects input. `ready` resolves once the
/// pending batch is non-empty and no new submission arrived for a full
/// quiet period; `drain` then hands over the accumulated batch and resets it.
/// Anything submitted after a drain starts the next cycle.
pub struct IngestionBatcher {
    pending: Mutex<Vec<RegistrationItem>>,
    activity: Notify,
    quiet_period: Duration,
}

impl IngestionBatcher {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            activity: Notify::new(),
            quiet_period,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Append a registration to the pending batch and restart the quiet period
    pub fn submit(&self, item: RegistrationItem) {
        let backlog = {
            let mut pending = self.lock_pending();
            pending.push(item);
            pending.len()
        };
        debug!(backlog, "Registration submitted");
        self.activity.notify_one();
    }

    /// Number of registrations waiting for the next drain
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Wait until a non-empty batch has been idle for the quiet period
    pub async fn ready(&self) {
        loop {
            if self.pending_len() == 0 {
                self.activity.notified().await;
                continue;
            }

            match timeout(self.quiet_period, self.activity.notified()).await {
                // A submission arrived inside the window; start counting again
                Ok(()) => continue,
                Err(_) => {
                    if self.pending_len() > 0 {
                        return;
                    }
                }
            }
        }
    }

    /// Take the whole accumulated batch, leaving the batcher empty
    pub fn drain(&self) -> Vec<RegistrationItem> {
        std::mem::take(&mut *self.lock_pending())
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<RegistrationItem>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
