//! Event-driven reconciliation of source VirtualServices into the aggregate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use meshroute_core::{LabelSelector, VirtualService, WatchEvent, WatchStream};
use meshroute_rules::RuleUpdate;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate::AggregateHandle;

/// What a single event did to the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Rules appended for a created resource.
    Added(usize),
    /// Old rules removed and new ones appended for a modified resource.
    Updated(RuleUpdate),
    /// Rules removed for a deleted resource.
    Deleted(usize),
    /// The resource does not carry the marker label.
    Ignored,
}

/// Point-in-time copy of [`EventCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub ignored: u64,
}

/// Per-kind counts of events handled by the reconciler.
#[derive(Debug, Default)]
pub struct EventCounters {
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    ignored: AtomicU64,
}

impl EventCounters {
    fn record(&self, applied: &Applied) {
        let counter = match applied {
            Applied::Added(_) => &self.created,
            Applied::Updated(_) => &self.updated,
            Applied::Deleted(_) => &self.deleted,
            Applied::Ignored => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventStats {
        EventStats {
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Applies watch events for source VirtualServices to the aggregate's rules.
///
/// The marker label is tested on every event independently; nothing about a
/// resource is remembered between events.
pub struct Reconciler {
    aggregate: Arc<AggregateHandle>,
    selector: LabelSelector,
    counters: Arc<EventCounters>,
}

impl Reconciler {
    pub fn new(aggregate: Arc<AggregateHandle>, selector: LabelSelector) -> Self {
        Self {
            aggregate,
            selector,
            counters: Arc::new(EventCounters::default()),
        }
    }

    fn is_source(&self, vs: &VirtualService) -> bool {
        self.selector.matches(vs.labels())
    }

    /// Apply one event.
    ///
    /// - created: append the resource's rules if it is labelled
    /// - updated: if the new version is labelled, swap the old version's
    ///   rules for the new ones (the old version's label is not consulted)
    /// - deleted: remove the resource's rules if it was labelled
    pub fn handle_event(&self, event: &WatchEvent) -> Applied {
        let rules = self.aggregate.rules();
        let applied = match event {
            WatchEvent::Created(vs) if self.is_source(vs) => {
                let owner = vs.key();
                info!(
                    resource = %owner,
                    rules = vs.rules().len(),
                    "detected added virtual service"
                );
                Applied::Added(rules.append(&owner, vs.rules()))
            }
            WatchEvent::Updated { old, new } if self.is_source(new) => {
                let owner = new.key();
                info!(
                    resource = %owner,
                    rules = new.rules().len(),
                    "detected update in virtual service"
                );
                Applied::Updated(rules.update(&owner, new.rules(), old.rules()))
            }
            WatchEvent::Deleted(vs) if self.is_source(vs) => {
                let owner = vs.key();
                info!(
                    resource = %owner,
                    rules = vs.rules().len(),
                    "detected deletion of virtual service"
                );
                Applied::Deleted(rules.delete(&owner, vs.rules()))
            }
            other => {
                let resource = other.key();
                debug!(%resource, event = other.kind(), "ignoring unlabelled virtual service");
                Applied::Ignored
            }
        };
        self.counters.record(&applied);
        applied
    }

    /// Consume `events` one at a time until the stream ends or `shutdown` flips.
    pub async fn run(&self, mut events: WatchStream, mut shutdown: watch::Receiver<bool>) {
        info!(selector = %self.selector, aggregate = %self.aggregate.key(), "reconciler started");
        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => {
                        warn!("watch stream ended");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Shared handle to the event counters, for the metrics endpoint.
    pub fn counters(&self) -> Arc<EventCounters> {
        Arc::clone(&self.counters)
    }

    pub fn aggregate(&self) -> &Arc<AggregateHandle> {
        &self.aggregate
    }
}

#[cfg(test)]
mod tests {
    use meshroute_core::{DuplicatePolicy, HttpRoute};

    use super::*;

    fn rule(name: &str, host: &str) -> HttpRoute {
        HttpRoute::named(name)
            .with_prefix_match(format!("/{name}"))
            .with_destination(host)
    }

    fn fallback() -> HttpRoute {
        HttpRoute::named("default-haproxy").with_destination("haproxy.internal")
    }

    fn reconciler() -> Reconciler {
        let aggregate = VirtualService::new("infra", "mesh-routing", vec![fallback()])
            .with_label("network", "mesh");
        let handle = AggregateHandle::new(aggregate, DuplicatePolicy::Skip, Some(fallback()));
        Reconciler::new(Arc::new(handle), LabelSelector::new("network", "edge"))
    }

    fn source(name: &str, rules: Vec<HttpRoute>) -> VirtualService {
        VirtualService::new("team", name, rules).with_label("network", "edge")
    }

    #[test]
    fn created_labelled_resource_is_appended() {
        let r = reconciler();
        let vs = source("api", vec![rule("api", "api.svc")]);
        let applied = r.handle_event(&WatchEvent::Created(vs));

        assert_eq!(applied, Applied::Added(1));
        assert_eq!(r.aggregate().rules().len(), 2);
    }

    #[test]
    fn unlabelled_events_are_ignored() {
        let r = reconciler();
        let plain = VirtualService::new("team", "api", vec![rule("api", "api.svc")]);

        assert_eq!(r.handle_event(&WatchEvent::Created(plain.clone())), Applied::Ignored);
        assert_eq!(
            r.handle_event(&WatchEvent::Updated { old: plain.clone(), new: plain.clone() }),
            Applied::Ignored
        );
        assert_eq!(r.handle_event(&WatchEvent::Deleted(plain)), Applied::Ignored);
        assert_eq!(r.aggregate().rules().snapshot(), vec![fallback()]);
        assert_eq!(r.counters().snapshot().ignored, 3);
    }

    #[test]
    fn aggregate_own_events_are_ignored() {
        let r = reconciler();
        let own = r.aggregate().snapshot();
        assert_eq!(r.handle_event(&WatchEvent::Created(own)), Applied::Ignored);
    }

    #[test]
    fn update_losing_label_leaves_rules_in_place() {
        let r = reconciler();
        let labelled = source("api", vec![rule("api", "api.svc")]);
        r.handle_event(&WatchEvent::Created(labelled.clone()));

        let mut unlabelled = labelled.clone();
        unlabelled.metadata.labels.clear();
        let applied = r.handle_event(&WatchEvent::Updated { old: labelled, new: unlabelled });

        assert_eq!(applied, Applied::Ignored);
        assert!(r.aggregate().rules().contains(&rule("api", "api.svc")));
    }

    #[test]
    fn update_gaining_label_removes_nothing_unrelated() {
        let r = reconciler();
        // A different labelled resource already contributes a rule...
        r.handle_event(&WatchEvent::Created(source("web", vec![rule("web", "web.svc")])));

        // ...and an unlabelled resource carrying a look-alike rule gains the label.
        let old = VirtualService::new("team", "api", vec![rule("api", "api.svc")]);
        let new = source("api", vec![rule("api", "api.svc")]);
        let applied = r.handle_event(&WatchEvent::Updated { old, new });

        assert_eq!(applied, Applied::Updated(RuleUpdate { removed: 0, appended: 1 }));
        let snapshot = r.aggregate().rules().snapshot();
        assert_eq!(snapshot, vec![fallback(), rule("web", "web.svc"), rule("api", "api.svc")]);
    }

    #[test]
    fn delete_labelled_resource_removes_its_rules() {
        let r = reconciler();
        let vs = source("api", vec![rule("api", "api.svc"), rule("api-v2", "api.svc")]);
        r.handle_event(&WatchEvent::Created(vs.clone()));

        assert_eq!(r.handle_event(&WatchEvent::Deleted(vs)), Applied::Deleted(2));
        assert_eq!(r.aggregate().rules().snapshot(), vec![fallback()]);

        let stats = r.counters().snapshot();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.deleted, 1);
    }

    #[test]
    fn rule_shared_by_two_sources_outlives_one_of_them() {
        let r = reconciler();
        let shared = rule("healthz", "health.svc");
        let a = source("a", vec![shared.clone()]);
        let b = source("b", vec![shared.clone()]);
        r.handle_event(&WatchEvent::Created(a.clone()));
        r.handle_event(&WatchEvent::Created(b.clone()));

        assert_eq!(r.handle_event(&WatchEvent::Deleted(a)), Applied::Deleted(0));
        assert_eq!(r.aggregate().rules().snapshot(), vec![fallback(), shared]);

        assert_eq!(r.handle_event(&WatchEvent::Deleted(b)), Applied::Deleted(1));
        assert_eq!(r.aggregate().rules().snapshot(), vec![fallback()]);
    }

    #[tokio::test]
    async fn run_drains_stream_then_stops() {
        let r = reconciler();
        let events = futures::stream::iter(vec![
            WatchEvent::Created(source("a", vec![rule("a", "a.svc")])),
            WatchEvent::Created(source("b", vec![rule("b", "b.svc")])),
        ])
        .boxed();
        let (_tx, rx) = watch::channel(false);

        r.run(events, rx).await;

        assert_eq!(r.aggregate().rules().len(), 3);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let r = reconciler();
        let events: WatchStream = futures::stream::pending().boxed();
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), r.run(events, rx))
            .await
            .expect("reconciler did not stop");
        stopper.await.unwrap();
    }
}
