//! In-memory aggregation of HTTP routing rules.
//!
//! This crate provides:
//! - [`RuleSet`]: the lock-guarded rule list with append / update / delete
//! - Structural rule equality used to recognise "the same rule"
//! - Mutation counters for the metrics endpoint

pub mod counters;
pub mod equality;
pub mod rule_set;

pub use counters::{MutationCounters, MutationStats};
pub use equality::{contains, position_of, same_rule, unique_rules};
pub use rule_set::{AppendReport, RuleEntry, RuleSet, RuleUpdate};
