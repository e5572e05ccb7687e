// Min-priority queue of interval groups ordered by next due time

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tokio::time::Instant;

/// Next firing of one interval group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueEntry {
    pub interval: u64,
    pub due_at: Instant,
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.interval.cmp(&other.interval))
    }
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Holds at most one pending entry per interval value
#[derive(Debug, Default)]
pub struct DueQueue {
    heap: BinaryHeap<Reverse<DueEntry>>,
    queued: HashSet<u64>,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `interval` at `due_at` unless it already has an entry.
    ///
    /// Returns `true` if a new entry was added; an existing entry keeps its
    /// due time.
    pub fn ensure(&mut self, interval: u64, due_at: Instant) -> bool {
        if !self.queued.insert(interval) {
            return false;
        }
        self.heap.push(Reverse(DueEntry { interval, due_at }));
        true
    }

    /// Earliest entry without removing it
    pub fn peek(&self) -> Option<DueEntry> {
        self.heap.peek().map(|Reverse(entry)| *entry)
    }

    /// Remove and return the earliest entry
    pub fn pop(&mut self) -> Option<DueEntry> {
        let Reverse(entry) = self.heap.pop()?;
        self.queued.remove(&entry.interval);
        Some(entry)
    }

    /// Remove and return the earliest entry if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<DueEntry> {
        match self.peek() {
            Some(entry) if entry.due_at <= now => self.pop(),
            _ => None,
        }
    }

    pub fn contains(&self, interval: u64) -> bool {
        self.queued.contains(&interval)
    }

    /// Due time of the entry for `interval`, if queued
    pub fn due_at(&self, interval: u64) -> Option<Instant> {
        if !self.contains(interval) {
            return None;
        }
        self.heap
            .iter()
            .find(|Reverse(entry)| entry.interval == interval)
            .map(|Reverse(entry)| entry.due_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pops_in_due_order() {
        let now = Instant::now();
        let mut queue = DueQueue::new();
        queue.ensure(5000, now + Duration::from_millis(5000));
        queue.ensure(1000, now + Duration::from_millis(1000));
        queue.ensure(3000, now + Duration::from_millis(3000));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.interval)
            .collect();
        assert_eq!(order, vec![1000, 3000, 5000]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ensure_keeps_single_entry_and_due_time() {
        let now = Instant::now();
        let mut queue = DueQueue::new();
        assert!(queue.ensure(1000, now + Duration::from_millis(1000)));
        assert!(!queue.ensure(1000, now + Duration::from_millis(10)));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.due_at(1000), Some(now + Duration::from_millis(1000)));
    }

    #[test]
    fn test_pop_allows_requeue() {
        let now = Instant::now();
        let mut queue = DueQueue::new();
        queue.ensure(1000, now);
        assert_eq!(queue.pop().map(|e| e.interval), Some(1000));
        assert!(!queue.contains(1000));
        assert!(queue.ensure(1000, now + Duration::from_millis(1000)));
    }

    #[test]
    fn test_pop_due_respects_now() {
        let now = Instant::now();
        let mut queue = DueQueue::new();
        queue.ensure(2000, now + Duration::from_millis(2000));

        assert!(queue.pop_due(now).is_none());
        let entry = queue.pop_due(now + Duration::from_millis(2000));
        assert_eq!(entry.map(|e| e.interval), Some(2000));
    }
}
