//! The aggregate's rule list and its three mutations.

mod core;
mod ops;


pub use self::core::RuleSet;
pub use self::ops::{
    append_rules, delete_rules, update_rules, AppendReport, RuleEntry, RuleUpdate,
};
