//! [`AggregateHandle`]: the live aggregate VirtualService.

use meshroute_core::{
    DuplicatePolicy, HttpRoute, ObjectKey, ObjectMeta, VirtualService, VirtualServiceSpec,
};
use meshroute_rules::RuleSet;

/// The aggregate resource held in memory for the lifetime of the process.
///
/// Identity, labels, hosts and gateways are fixed once bootstrap is done;
/// only the rule list changes, through [`rules`](Self::rules).
#[derive(Debug)]
pub struct AggregateHandle {
    metadata: ObjectMeta,
    hosts: Vec<String>,
    gateways: Vec<String>,
    rules: RuleSet,
}

impl AggregateHandle {
    /// Take ownership of an aggregate resource, pinning `fallback` if given.
    pub fn new(
        aggregate: VirtualService,
        policy: DuplicatePolicy,
        fallback: Option<HttpRoute>,
    ) -> Self {
        let VirtualService { metadata, spec } = aggregate;
        let mut rules = RuleSet::with_rules(spec.http, policy);
        if let Some(fallback) = fallback {
            rules = rules.with_pinned(fallback);
        }
        Self {
            metadata,
            hosts: spec.hosts,
            gateways: spec.gateways,
            rules,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn gateways(&self) -> &[String] {
        &self.gateways
    }

    /// The full resource as it should be persisted right now.
    pub fn snapshot(&self) -> VirtualService {
        VirtualService {
            metadata: self.metadata.clone(),
            spec: VirtualServiceSpec {
                hosts: self.hosts.clone(),
                gateways: self.gateways.clone(),
                http: self.rules.snapshot(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_rule_mutations() {
        let fallback = HttpRoute::named("default").with_destination("lb.internal");
        let mut vs = VirtualService::new("infra", "mesh-routing", vec![fallback.clone()])
            .with_label("network", "mesh");
        vs.spec.hosts = vec!["lb.internal".into(), "*.example.internal".into()];
        vs.spec.gateways = vec!["mesh".into()];

        let handle =
            AggregateHandle::new(vs.clone(), DuplicatePolicy::Skip, Some(fallback.clone()));
        assert_eq!(handle.snapshot(), vs);

        let api = HttpRoute::named("api").with_destination("api.svc");
        handle.rules().append(&ObjectKey::new("team", "api"), std::slice::from_ref(&api));

        let snap = handle.snapshot();
        assert_eq!(snap.spec.http, vec![fallback.clone(), api]);
        assert_eq!(snap.metadata, vs.metadata);
        assert_eq!(handle.rules().pinned(), Some(&fallback));
        assert_eq!(handle.key(), ObjectKey::new("infra", "mesh-routing"));
    }
}
