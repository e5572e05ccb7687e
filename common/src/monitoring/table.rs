// Interval table: poll bindings grouped by interval value

use super::binding::PollBinding;
use std::collections::BTreeMap;

/// Mapping from interval (ms) to the bindings currently sharing it.
///
/// Groups never stay empty: removing the last binding prunes the group.
#[derive(Debug, Default)]
pub struct IntervalTable {
    groups: BTreeMap<u64, Vec<PollBinding>>,
}

impl IntervalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding to its interval group.
    ///
    /// Returns `true` when the group did not exist before.
    pub fn add_binding(&mut self, binding: PollBinding) -> bool {
        let interval = binding.interval();
        let created = !self.groups.contains_key(&interval);
        self.groups.entry(interval).or_default().push(binding);
        created
    }

    /// Remove every binding of `device_id` across all groups, pruning
    /// groups left empty. Returns the number of bindings removed.
    pub fn remove_device(&mut self, device_id: &str) -> usize {
        let mut removed = 0;
        self.groups.retain(|_, bindings| {
            let before = bindings.len();
            bindings.retain(|b| b.device_id() != device_id);
            removed += before - bindings.len();
            !bindings.is_empty()
        });
        removed
    }

    /// Current bindings for `interval`, cloned for execution outside any lock
    pub fn lookup(&self, interval: u64) -> Vec<PollBinding> {
        self.groups.get(&interval).cloned().unwrap_or_default()
    }

    /// Drop the group for `interval` if it has no bindings left
    pub fn prune(&mut self, interval: u64) {
        if self.groups.get(&interval).is_some_and(Vec::is_empty) {
            self.groups.remove(&interval);
        }
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.groups
            .values()
            .flatten()
            .any(|b| b.device_id() == device_id)
    }

    /// Distinct device ids bound to `interval`, in binding order
    pub fn device_ids(&self, interval: u64) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for binding in self.groups.get(&interval).into_iter().flatten() {
            if !ids.iter().any(|id| id == binding.device_id()) {
                ids.push(binding.device_id().to_string());
            }
        }
        ids
    }

    /// Intervals with at least one binding, ascending
    pub fn intervals(&self) -> Vec<u64> {
        self.groups.keys().copied().collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn binding_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}
