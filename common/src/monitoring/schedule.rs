// Interval table and due queue kept in step under one owner

use super::binding::{DevicePlan, PollBinding};
use super::queue::{DueEntry, DueQueue};
use super::table::IntervalTable;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// State of one interval group, as reported by snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalSnapshot {
    pub interval_ms: u64,
    pub device_ids: Vec<String>,
    pub bindings: usize,
    pub queued: bool,
    pub next_due_in: Option<Duration>,
}

/// A due group taken off the queue for firing
#[derive(Debug)]
pub struct DueGroup {
    pub entry: DueEntry,
    pub bindings: Vec<PollBinding>,
}

/// Interval table plus due queue.
///
/// Every interval with bindings has exactly one queued entry, except while
/// its group is being fired; the firing side re-enqueues it afterwards.
#[derive(Debug, Default)]
pub struct PollSchedule {
    table: IntervalTable,
    queue: DueQueue,
    /// Intervals taken off the queue whose fire has not been rescheduled yet
    firing: HashSet<u64>,
}

impl PollSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding and make sure its interval is queued.
    ///
    /// A newly queued interval is due at `now + interval`; an interval that
    /// already has an entry keeps its due time. An interval that is firing is
    /// left to its reschedule.
    pub fn add_binding(&mut self, binding: PollBinding, now: Instant) {
        let interval = binding.interval();
        self.table.add_binding(binding);
        if !self.firing.contains(&interval) {
            self.queue
                .ensure(interval, now + Duration::from_millis(interval));
        }
    }

    /// Purge a device from every group. Its queue entries are left to retire
    /// on their next fire.
    pub fn remove_device(&mut self, device_id: &str) -> usize {
        self.table.remove_device(device_id)
    }

    /// Swap a device's bindings for `bindings`
    pub fn replace_device(&mut self, device_id: &str, bindings: Vec<PollBinding>, now: Instant) {
        self.table.remove_device(device_id);
        for binding in bindings {
            self.add_binding(binding, now);
        }
    }

    pub fn apply(&mut self, plan: DevicePlan, now: Instant) {
        match plan {
            DevicePlan::Purge { device_id } => {
                self.remove_device(&device_id);
            }
            DevicePlan::Replace {
                device_id,
                bindings,
            } => self.replace_device(&device_id, bindings, now),
        }
    }

    pub fn lookup(&self, interval: u64) -> Vec<PollBinding> {
        self.table.lookup(interval)
    }

    /// Earliest queued entry
    pub fn next_due(&self) -> Option<DueEntry> {
        self.queue.peek()
    }

    /// Pop the earliest entry if due at `now`, with its current bindings.
    ///
    /// An interval whose group has emptied is retired here: it is popped,
    /// pruned and not handed back for firing.
    pub fn take_due(&mut self, now: Instant) -> Option<DueGroup> {
        loop {
            let entry = self.queue.pop_due(now)?;
            let bindings = self.table.lookup(entry.interval);
            if bindings.is_empty() {
                self.table.prune(entry.interval);
                tracing::debug!(interval_ms = entry.interval, "Retired empty interval group");
                continue;
            }
            self.firing.insert(entry.interval);
            return Some(DueGroup { entry, bindings });
        }
    }

    /// Queue the next firing of `interval` at `due_at`, ending its fire
    pub fn reschedule(&mut self, interval: u64, due_at: Instant) -> bool {
        self.firing.remove(&interval);
        self.queue.ensure(interval, due_at)
    }

    pub fn is_firing(&self, interval: u64) -> bool {
        self.firing.contains(&interval)
    }

    pub fn is_queued(&self, interval: u64) -> bool {
        self.queue.contains(interval)
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.table.contains_device(device_id)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn group_count(&self) -> usize {
        self.table.group_count()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<IntervalSnapshot> {
        self.table
            .intervals()
            .into_iter()
            .map(|interval| IntervalSnapshot {
                interval_ms: interval,
                device_ids: self.table.device_ids(interval),
                bindings: self.table.lookup(interval).len(),
                queued: self.queue.contains(interval),
                next_due_in: self
                    .queue
                    .due_at(interval)
                    .map(|due| due.saturating_duration_since(now)),
            })
            .collect()
    }
}
