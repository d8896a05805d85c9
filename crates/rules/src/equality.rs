//! Rule identity: two rules are the same rule iff they are structurally equal.
//!
//! Rule sets are small (one entry per rule of every labelled resource), so
//! lookups are plain linear scans with no hashing or indexing.

use meshroute_core::HttpRoute;

/// Whether `a` and `b` are the same rule.
pub fn same_rule(a: &HttpRoute, b: &HttpRoute) -> bool {
    a == b
}

/// Whether `set` holds a rule equal to `rule`.
pub fn contains(set: &[HttpRoute], rule: &HttpRoute) -> bool {
    position_of(set, rule).is_some()
}

/// Index of the first rule in `set` equal to `rule`.
pub fn position_of(set: &[HttpRoute], rule: &HttpRoute) -> Option<usize> {
    set.iter().position(|candidate| same_rule(candidate, rule))
}

/// `rules` with every rule equal to an earlier one dropped, order kept.
pub fn unique_rules(rules: Vec<HttpRoute>) -> Vec<HttpRoute> {
    let mut unique: Vec<HttpRoute> = Vec::with_capacity(rules.len());
    for rule in rules {
        if !contains(&unique, &rule) {
            unique.push(rule);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn api() -> HttpRoute {
        HttpRoute::named("api")
            .with_prefix_match("/api")
            .with_destination("api.default.svc")
    }

    #[test]
    fn equal_values_are_the_same_rule() {
        assert!(same_rule(&api(), &api()));
    }

    #[test]
    fn name_alone_does_not_identify_a_rule() {
        let moved = HttpRoute::named("api")
            .with_prefix_match("/api")
            .with_destination("api.other.svc");
        assert!(!same_rule(&api(), &moved));
    }

    #[test]
    fn unmodelled_fields_take_part_in_equality() {
        let mut with_timeout = api();
        with_timeout.extra.insert("timeout".into(), json!("3s"));
        assert!(!same_rule(&api(), &with_timeout));
    }

    #[test]
    fn contains_and_position() {
        let other = HttpRoute::named("web").with_destination("web.default.svc");
        let set = vec![other.clone(), api(), api()];

        assert!(contains(&set, &api()));
        assert_eq!(position_of(&set, &api()), Some(1));

        let missing = HttpRoute::named("missing");
        assert!(!contains(&set, &missing));
        assert_eq!(position_of(&set, &missing), None);
    }

    #[test]
    fn unique_rules_keeps_first_occurrence() {
        let other = HttpRoute::named("web").with_destination("web.default.svc");
        let rules = vec![api(), other.clone(), api(), other.clone()];

        assert_eq!(unique_rules(rules), vec![api(), other]);
    }

    #[test]
    fn empty_set_contains_nothing() {
        assert!(!contains(&[], &api()));
    }
}
