//! Periodic write-back of the aggregate to the store.
//!
//! Each tick takes a consistent snapshot of the rule set and replaces the
//! stored aggregate with it. Failures are logged and retried on the next
//! tick; there is no other retry or backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use meshroute_core::{ResourceStore, StoreError, StoreResult};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregate::AggregateHandle;

// ── Stats ────────────────────────────────────────────────────────────

/// Outcome counts for flush attempts.
#[derive(Debug, Default)]
pub struct FlushStats {
    ok: AtomicU64,
    failed: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

/// JSON view of [`FlushStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub ok: u64,
    pub failed: u64,
    pub last_success: Option<DateTime<Utc>>,
}

impl FlushStats {
    fn record(&self, result: &StoreResult<()>) {
        match result {
            Ok(()) => {
                self.ok.fetch_add(1, Ordering::Relaxed);
                let mut last = self.last_success.lock().unwrap_or_else(PoisonError::into_inner);
                *last = Some(Utc::now());
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn report(&self) -> FlushReport {
        FlushReport {
            ok: self.ok.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_success: *self.last_success.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

// ── Flush ────────────────────────────────────────────────────────────

/// Persist the current state of `aggregate`.
///
/// Replaces the stored resource. If it has been deleted out from under us,
/// it is recreated from the in-memory state.
pub async fn flush_once<S>(store: &S, aggregate: &AggregateHandle) -> StoreResult<()>
where
    S: ResourceStore + ?Sized,
{
    let snapshot = aggregate.snapshot();
    match store.update_virtual_service(&snapshot).await {
        Ok(()) => {
            debug!(resource = %snapshot.key(), rules = snapshot.rules().len(), "flushed aggregate");
            Ok(())
        }
        Err(StoreError::NotFound { .. }) => {
            warn!(resource = %snapshot.key(), "aggregate disappeared, recreating it");
            store.create_virtual_service(&snapshot).await
        }
        Err(e) => Err(e),
    }
}

/// Flush once and fold the outcome into `stats`, logging failures.
pub async fn flush_and_record<S>(store: &S, aggregate: &AggregateHandle, stats: &FlushStats) -> bool
where
    S: ResourceStore + ?Sized,
{
    let result = flush_once(store, aggregate).await;
    if let Err(e) = &result {
        warn!(
            resource = %aggregate.key(),
            error = %e,
            "failed to flush aggregate, retrying next tick"
        );
    }
    stats.record(&result);
    result.is_ok()
}

/// Spawn the flush task: one flush immediately, then one per `period`.
///
/// Ticks that fall behind are delayed rather than bunched, so flushes never
/// overlap. The task exits when `shutdown` flips to `true`.
pub fn spawn_flush_task(
    store: Arc<dyn ResourceStore>,
    aggregate: Arc<AggregateHandle>,
    period: Duration,
    stats: Arc<FlushStats>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "flush task started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush_and_record(store.as_ref(), &aggregate, &stats).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("flush task stopped");
    })
}

#[cfg(test)]
mod tests {
    use meshroute_core::{DuplicatePolicy, HttpRoute, InMemoryStore, ObjectKey, VirtualService};

    use super::*;

    fn aggregate() -> AggregateHandle {
        let fallback = HttpRoute::named("default-haproxy").with_destination("lb.internal");
        let vs = VirtualService::new("infra", "mesh-routing", vec![fallback.clone()])
            .with_label("network", "mesh");
        AggregateHandle::new(vs, DuplicatePolicy::Skip, Some(fallback))
    }

    #[tokio::test]
    async fn flush_replaces_stored_rules() {
        let store = InMemoryStore::new();
        let handle = aggregate();
        store.create_virtual_service(&handle.snapshot()).await.unwrap();

        let api = HttpRoute::named("api").with_destination("api.svc");
        handle.rules().append(&ObjectKey::new("team", "api"), &[api]);
        flush_once(&store, &handle).await.unwrap();

        assert_eq!(store.virtual_service(&handle.key()), Some(handle.snapshot()));
    }

    #[tokio::test]
    async fn flush_recreates_deleted_aggregate() {
        let store = InMemoryStore::new();
        let handle = aggregate();

        flush_once(&store, &handle).await.unwrap();

        assert_eq!(store.virtual_service(&handle.key()), Some(handle.snapshot()));
    }

    #[tokio::test]
    async fn failed_flush_leaves_rules_and_counts_failure() {
        let store = InMemoryStore::new();
        let handle = aggregate();
        store.create_virtual_service(&handle.snapshot()).await.unwrap();
        store.set_fail_writes(true);
        let stats = FlushStats::default();

        let api = HttpRoute::named("api").with_destination("api.svc");
        handle.rules().append(&ObjectKey::new("team", "api"), &[api]);
        assert!(!flush_and_record(&store, &handle, &stats).await);

        assert_eq!(handle.rules().len(), 2);
        let report = stats.report();
        assert_eq!(report.failed, 1);
        assert_eq!(report.ok, 0);
        assert!(report.last_success.is_none());

        store.set_fail_writes(false);
        assert!(flush_and_record(&store, &handle, &stats).await);
        assert_eq!(store.virtual_service(&handle.key()), Some(handle.snapshot()));
        assert!(stats.report().last_success.is_some());
    }

    #[tokio::test]
    async fn task_flushes_immediately_and_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let handle = Arc::new(aggregate());
        store.create_virtual_service(&handle.snapshot()).await.unwrap();
        let writes = store.write_count();
        let stats = Arc::new(FlushStats::default());
        let (tx, rx) = watch::channel(false);

        let task = spawn_flush_task(
            store.clone(),
            Arc::clone(&handle),
            Duration::from_secs(3600),
            Arc::clone(&stats),
            rx,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.report().ok == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first flush never happened");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("flush task did not stop")
            .unwrap();

        assert_eq!(store.write_count(), writes + 1);
    }
}
