//! [`RuleSet`]: the shared, lock-guarded rule list of the aggregate.

use std::sync::{Mutex, MutexGuard, PoisonError};

use meshroute_core::{DuplicatePolicy, HttpRoute, ObjectKey};
use tracing::info;

use crate::counters::{MutationCounters, MutationStats};
use crate::equality::{same_rule, unique_rules};

use super::ops::{append_rules, delete_rules, update_rules, RuleEntry, RuleUpdate};

/// Ordered rule list plus the lock serializing every mutation of it.
///
/// Append, update and delete each hold the lock for their entire critical
/// section, so concurrent callers observe some serial order. Readers take
/// [`snapshot`](RuleSet::snapshot) under the same lock.
///
/// Mutations name the source resource they act for. A rule shared by
/// several resources stays until each of them has deleted or replaced it.
///
/// A rule can be *pinned* (the synthesized fallback): removals never delete
/// its last copy, whatever source resource asks for it.
#[derive(Debug)]
pub struct RuleSet {
    entries: Mutex<Vec<RuleEntry>>,
    pinned: Option<HttpRoute>,
    policy: DuplicatePolicy,
    counters: MutationCounters,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self::with_rules(Vec::new(), policy)
    }

    /// Create a rule set seeded with `rules`, kept in their given order.
    ///
    /// Seeded rules have no known owner. Under [`DuplicatePolicy::Skip`]
    /// repeated seeds collapse into their first occurrence.
    pub fn with_rules(rules: Vec<HttpRoute>, policy: DuplicatePolicy) -> Self {
        let rules = match policy {
            DuplicatePolicy::Skip => unique_rules(rules),
            DuplicatePolicy::Append => rules,
        };
        Self {
            entries: Mutex::new(rules.into_iter().map(RuleEntry::unowned).collect()),
            pinned: None,
            policy,
            counters: MutationCounters::new(),
        }
    }

    /// Pin `rule` so that removals never delete its last copy.
    pub fn with_pinned(mut self, rule: HttpRoute) -> Self {
        self.pinned = Some(rule);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RuleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `owner`'s `rules` at the end, subject to the duplicate policy.
    ///
    /// Returns the number of rules actually appended.
    pub fn append(&self, owner: &ObjectKey, rules: &[HttpRoute]) -> usize {
        let mut current = self.lock();
        let report = append_rules(&mut current, owner, rules, self.policy);

        self.counters.record_added(report.appended);
        self.counters.record_duplicates(report.duplicates);
        if report.appended > 0 {
            self.counters.bump_generation();
            info!(%owner, appended = report.appended, total = current.len(), "added routes");
        }
        report.appended
    }

    /// Release `owner`'s `old` rules, then append all of `new` without a
    /// duplicate check.
    pub fn update(&self, owner: &ObjectKey, new: &[HttpRoute], old: &[HttpRoute]) -> RuleUpdate {
        let mut current = self.lock();
        let pinned = self.pinned.as_ref();
        let result = update_rules(&mut current, owner, new, old, self.policy, pinned);

        self.counters.record_deleted(result.removed);
        self.counters.record_updated(result.appended);
        if result.changed() {
            self.counters.bump_generation();
            info!(
                %owner,
                removed = result.removed,
                appended = result.appended,
                total = current.len(),
                "updated routes"
            );
        }
        result
    }

    /// Release `owner`'s claim on each rule in `rules`.
    ///
    /// Returns the number of rules removed from the list; unmatched rules and
    /// rules still contributed by another resource stay.
    pub fn delete(&self, owner: &ObjectKey, rules: &[HttpRoute]) -> usize {
        let mut current = self.lock();
        let removed = delete_rules(&mut current, owner, rules, self.pinned.as_ref());

        self.counters.record_deleted(removed);
        if removed > 0 {
            self.counters.bump_generation();
            info!(%owner, removed, total = current.len(), "deleted routes");
        }
        removed
    }

    /// Consistent copy of the current list.
    pub fn snapshot(&self) -> Vec<HttpRoute> {
        self.lock().iter().map(|e| e.rule.clone()).collect()
    }

    /// Resources currently contributing a rule equal to `rule`.
    pub fn owners(&self, rule: &HttpRoute) -> Vec<ObjectKey> {
        let mut owners: Vec<ObjectKey> = self
            .lock()
            .iter()
            .filter(|e| same_rule(&e.rule, rule))
            .flat_map(|e| e.owners.iter().cloned())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn contains(&self, rule: &HttpRoute) -> bool {
        self.lock().iter().any(|e| same_rule(&e.rule, rule))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pinned(&self) -> Option<&HttpRoute> {
        self.pinned.as_ref()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Mutation counters, readable without taking the lock.
    pub fn stats(&self) -> MutationStats {
        self.counters.snapshot()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
