//! Mutation counters exposed to the metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of a [`MutationCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    /// Rules appended by add notifications.
    pub routes_added: u64,
    /// Rules re-appended by update notifications.
    pub routes_updated: u64,
    /// Rules removed by delete or update notifications.
    pub routes_deleted: u64,
    /// Appended candidates that were already present.
    pub duplicates_detected: u64,
    /// Bumped once per mutation that changed the list.
    pub generation: u64,
}

/// Monotonic counters, written under the rule set lock and read lock-free.
#[derive(Debug, Default)]
pub struct MutationCounters {
    routes_added: AtomicU64,
    routes_updated: AtomicU64,
    routes_deleted: AtomicU64,
    duplicates_detected: AtomicU64,
    generation: AtomicU64,
}

impl MutationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_added(&self, n: usize) {
        self.routes_added.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_updated(&self, n: usize) {
        self.routes_updated.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_deleted(&self, n: usize) {
        self.routes_deleted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicates(&self, n: usize) {
        self.duplicates_detected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> MutationStats {
        MutationStats {
            routes_added: self.routes_added.load(Ordering::Relaxed),
            routes_updated: self.routes_updated.load(Ordering::Relaxed),
            routes_deleted: self.routes_deleted.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let c = MutationCounters::new();
        c.record_added(2);
        c.record_added(1);
        c.record_updated(4);
        c.record_deleted(1);
        c.record_duplicates(3);
        c.bump_generation();

        assert_eq!(
            c.snapshot(),
            MutationStats {
                routes_added: 3,
                routes_updated: 4,
                routes_deleted: 1,
                duplicates_detected: 3,
                generation: 1,
            }
        );
    }

    #[test]
    fn fresh_counters_are_zero() {
        assert_eq!(MutationCounters::new().snapshot(), MutationStats::default());
    }
}
