//! Lock-free list operations behind [`RuleSet`](super::RuleSet).
//!
//! Each function mutates a plain `Vec` of entries in place; the caller
//! provides mutual exclusion. Removal is order-preserving.
//!
//! Every entry remembers which source resources contributed its rule. Under
//! [`DuplicatePolicy::Skip`] a rule contributed by several resources is one
//! entry with several owners, and it leaves the list only when the last of
//! them releases it.

use std::collections::BTreeSet;

use meshroute_core::{DuplicatePolicy, HttpRoute, ObjectKey};
use tracing::{debug, info};

use crate::equality::same_rule;

/// One rule of the list and the resources that contributed it.
///
/// An empty owner set means the contributors are unknown: the rule was
/// seeded from a stored aggregate or a bootstrap scan and no watch event has
/// claimed it yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntry {
    pub rule: HttpRoute,
    pub owners: BTreeSet<ObjectKey>,
}

impl RuleEntry {
    pub fn unowned(rule: HttpRoute) -> Self {
        Self {
            rule,
            owners: BTreeSet::new(),
        }
    }

    pub fn owned_by(rule: HttpRoute, owner: &ObjectKey) -> Self {
        Self {
            rule,
            owners: BTreeSet::from([owner.clone()]),
        }
    }
}

/// Result of an append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Rules pushed onto the list.
    pub appended: usize,
    /// Candidates that were already present when examined.
    pub duplicates: usize,
}

/// Result of an update: old rules removed, new rules recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    /// Entries that left the list.
    pub removed: usize,
    /// Rules of the new version, whether pushed or folded into an equal entry.
    pub appended: usize,
}

impl RuleUpdate {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.appended > 0
    }
}

/// Append `owner`'s `candidates` to `current`, checking each against the
/// list as it grows.
///
/// Under [`DuplicatePolicy::Skip`] a candidate equal to an existing entry is
/// not appended; `owner` is recorded on that entry instead. Under
/// [`DuplicatePolicy::Append`] it is reported and appended anyway.
pub fn append_rules(
    current: &mut Vec<RuleEntry>,
    owner: &ObjectKey,
    candidates: &[HttpRoute],
    policy: DuplicatePolicy,
) -> AppendReport {
    let mut report = AppendReport::default();
    for rule in candidates {
        if let Some(entry) = current.iter_mut().find(|e| same_rule(&e.rule, rule)) {
            report.duplicates += 1;
            match policy {
                DuplicatePolicy::Skip => {
                    entry.owners.insert(owner.clone());
                    info!(route = %rule.name, %owner, "route already exists, not adding");
                    continue;
                }
                DuplicatePolicy::Append => {
                    info!(route = %rule.name, %owner, "route already exists, appending anyway");
                }
            }
        }
        current.push(RuleEntry::owned_by(rule.clone(), owner));
        report.appended += 1;
    }
    report
}

/// Release `owner`'s claim on each rule in `to_remove`.
///
/// The entry `owner` contributed is preferred, then an unowned one. An entry
/// leaves the list once nobody owns it; entries still owned by another
/// resource stay. When `pinned` is set, the last remaining copy of that rule
/// is never removed. Returns the number of entries removed.
pub fn delete_rules(
    current: &mut Vec<RuleEntry>,
    owner: &ObjectKey,
    to_remove: &[HttpRoute],
    pinned: Option<&HttpRoute>,
) -> usize {
    let mut removed = 0;
    for rule in to_remove {
        if release(current, owner, rule, pinned) {
            removed += 1;
        }
    }
    removed
}

/// Release `owner`'s `old` rules, then record every rule of `new` for it.
///
/// The new side is never checked for duplicates. Under
/// [`DuplicatePolicy::Skip`] a new rule equal to a remaining entry gains
/// `owner` rather than a second copy; under [`DuplicatePolicy::Append`] it is
/// pushed.
pub fn update_rules(
    current: &mut Vec<RuleEntry>,
    owner: &ObjectKey,
    new: &[HttpRoute],
    old: &[HttpRoute],
    policy: DuplicatePolicy,
    pinned: Option<&HttpRoute>,
) -> RuleUpdate {
    let removed = delete_rules(current, owner, old, pinned);
    for rule in new {
        let existing = match policy {
            DuplicatePolicy::Skip => current.iter_mut().find(|e| same_rule(&e.rule, rule)),
            DuplicatePolicy::Append => None,
        };
        match existing {
            Some(entry) => {
                entry.owners.insert(owner.clone());
            }
            None => current.push(RuleEntry::owned_by(rule.clone(), owner)),
        }
    }
    RuleUpdate {
        removed,
        appended: new.len(),
    }
}

fn release(
    current: &mut Vec<RuleEntry>,
    owner: &ObjectKey,
    rule: &HttpRoute,
    pinned: Option<&HttpRoute>,
) -> bool {
    let equal = |e: &RuleEntry| same_rule(&e.rule, rule);
    let idx = current
        .iter()
        .position(|e| equal(e) && e.owners.contains(owner))
        .or_else(|| current.iter().position(|e| equal(e) && e.owners.is_empty()));
    let Some(idx) = idx else {
        if current.iter().any(equal) {
            debug!(route = %rule.name, %owner, "route still contributed by another resource");
        } else {
            debug!(route = %rule.name, "no matching route to remove");
        }
        return false;
    };

    let entry = &mut current[idx];
    entry.owners.remove(owner);
    if !entry.owners.is_empty() {
        debug!(
            route = %rule.name,
            owners = entry.owners.len(),
            "route still contributed by another resource"
        );
        return false;
    }
    if pinned == Some(rule) && current.iter().filter(|e| equal(e)).count() == 1 {
        debug!(route = %rule.name, "keeping pinned fallback route");
        return false;
    }
    current.remove(idx);
    true
}
