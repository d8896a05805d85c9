//! Bootstrap: build the aggregate from a full scan, or adopt the stored one.
//!
//! Runs once at startup. Any error here is fatal to the process: without an
//! aggregate and a fallback destination there is nothing to reconcile into.

use std::collections::BTreeMap;

use meshroute_core::config::Config;
use meshroute_core::{
    DuplicatePolicy, HttpRoute, LabelSelector, ObjectMeta, ResourceStore, StoreError,
    VirtualService, VirtualServiceSpec,
};
use meshroute_rules::unique_rules;
use tracing::{info, warn};

use crate::aggregate::AggregateHandle;
use crate::error::{ControllerError, Result};

/// How [`ensure_aggregate`] obtained the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No aggregate existed; one was built and created.
    Created,
    /// An aggregate already existed and was taken over as-is.
    Adopted,
}

/// The synthesized rule sending unmatched traffic to `host`.
pub fn fallback_rule(name: &str, host: &str) -> HttpRoute {
    HttpRoute::named(name).with_destination(host)
}

/// Rules of every resource carrying `selector`, in listing then rule order.
pub fn collect_source_rules(
    resources: &[VirtualService],
    selector: &LabelSelector,
) -> Vec<HttpRoute> {
    resources
        .iter()
        .filter(|vs| selector.matches(vs.labels()))
        .flat_map(|vs| vs.rules().iter().cloned())
        .collect()
}

/// Resolve the fallback destination host from its ServiceEntry.
pub async fn resolve_fallback_host<S>(store: &S, config: &Config) -> Result<String>
where
    S: ResourceStore + ?Sized,
{
    let key = config.fallback.key();
    let entry = match store.get_service_entry(&key).await {
        Ok(entry) => entry,
        Err(StoreError::NotFound { .. }) => return Err(ControllerError::FallbackMissing(key)),
        Err(e) => return Err(e.into()),
    };
    entry
        .primary_host()
        .map(str::to_owned)
        .ok_or(ControllerError::FallbackHostMissing(key))
}

/// Build the initial aggregate from a scan of every VirtualService.
///
/// Returns the resource (not yet persisted) and its fallback rule. Under
/// [`DuplicatePolicy::Skip`] a rule shared by several sources appears once.
pub async fn build_initial_aggregate<S>(
    store: &S,
    config: &Config,
) -> Result<(VirtualService, HttpRoute)>
where
    S: ResourceStore + ?Sized,
{
    let resources = store.list_virtual_services().await?;
    let mut rules = collect_source_rules(&resources, &config.source.label);
    let contributing = resources
        .iter()
        .filter(|vs| config.source.label.matches(vs.labels()))
        .count();

    let host = resolve_fallback_host(store, config).await?;
    let fallback = fallback_rule(&config.fallback.rule_name, &host);
    rules.push(fallback.clone());
    if config.aggregate.duplicate_policy == DuplicatePolicy::Skip {
        rules = unique_rules(rules);
    }

    info!(
        scanned = resources.len(),
        contributing,
        rules = rules.len(),
        fallback_host = %host,
        "built initial mesh routing aggregate"
    );

    let aggregate = VirtualService {
        metadata: ObjectMeta {
            name: config.aggregate.name.clone(),
            namespace: config.aggregate.namespace.clone(),
            labels: BTreeMap::from([(
                config.aggregate.label.key.clone(),
                config.aggregate.label.value.clone(),
            )]),
        },
        spec: VirtualServiceSpec {
            hosts: vec![host, config.aggregate.wildcard_host.clone()],
            gateways: vec![config.aggregate.gateway.clone()],
            http: rules,
        },
    };
    Ok((aggregate, fallback))
}

/// Build the initial aggregate and persist it with a create.
pub async fn bootstrap<S>(store: &S, config: &Config) -> Result<AggregateHandle>
where
    S: ResourceStore + ?Sized,
{
    let (aggregate, fallback) = build_initial_aggregate(store, config).await?;
    store.create_virtual_service(&aggregate).await?;
    info!(
        resource = %aggregate.key(),
        rules = aggregate.rules().len(),
        "created mesh routing aggregate"
    );
    Ok(AggregateHandle::new(
        aggregate,
        config.aggregate.duplicate_policy,
        Some(fallback),
    ))
}

/// Fetch the aggregate, bootstrapping it when it does not exist yet.
pub async fn ensure_aggregate<S>(
    store: &S,
    config: &Config,
) -> Result<(AggregateHandle, BootstrapOutcome)>
where
    S: ResourceStore + ?Sized,
{
    let key = config.aggregate.key();
    match store.get_virtual_service(&key).await {
        Ok(existing) => {
            info!(resource = %key, rules = existing.rules().len(), "found mesh routing aggregate");
            Ok((adopt(store, config, existing).await?, BootstrapOutcome::Adopted))
        }
        Err(StoreError::NotFound { .. }) => {
            info!(resource = %key, "mesh routing aggregate not found, initializing");
            match bootstrap(store, config).await {
                Ok(handle) => Ok((handle, BootstrapOutcome::Created)),
                Err(ControllerError::Store(StoreError::AlreadyExists { .. })) => {
                    warn!(resource = %key, "aggregate was created concurrently, adopting it");
                    let existing = store.get_virtual_service(&key).await?;
                    Ok((adopt(store, config, existing).await?, BootstrapOutcome::Adopted))
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Take over a stored aggregate, restoring its fallback rule if it lost it.
async fn adopt<S>(
    store: &S,
    config: &Config,
    mut existing: VirtualService,
) -> Result<AggregateHandle>
where
    S: ResourceStore + ?Sized,
{
    let rule_name = &config.fallback.rule_name;
    let fallback = match existing.rules().iter().find(|r| r.name == *rule_name) {
        Some(rule) => rule.clone(),
        None => {
            let host = resolve_fallback_host(store, config).await?;
            let rule = fallback_rule(rule_name, &host);
            warn!(
                resource = %existing.key(),
                fallback_host = %host,
                "adopted aggregate had no fallback route, restoring it"
            );
            existing.spec.http.push(rule.clone());
            rule
        }
    };
    Ok(AggregateHandle::new(
        existing,
        config.aggregate.duplicate_policy,
        Some(fallback),
    ))
}
