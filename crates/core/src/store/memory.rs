//! In-process [`ResourceStore`] backed by ordered maps and a broadcast channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{ObjectKey, ServiceEntry, VirtualService};

use super::{ResourceStore, WatchEvent, WatchStream, SERVICE_ENTRY, VIRTUAL_SERVICE};

/// Buffered events per watcher before it starts lagging.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct Inner {
    virtual_services: BTreeMap<ObjectKey, VirtualService>,
    service_entries: BTreeMap<ObjectKey, ServiceEntry>,
}

/// A store that lives entirely in memory.
///
/// Listing order is `namespace/name` order. Every change, whether made by the
/// controller (`create`/`update`) or by a simulated external actor
/// ([`apply_virtual_service`](Self::apply_virtual_service),
/// [`remove_virtual_service`](Self::remove_virtual_service)), is broadcast to
/// all open watches. A watcher that falls more than `EVENT_BUFFER` events
/// behind loses the overflow, with a warning.
#[derive(Debug)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<WatchEvent>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            fail_writes: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }

    // ── External-actor helpers ──────────────────────────────────

    /// Create or replace a VirtualService, emitting `Created` or `Updated`.
    pub fn apply_virtual_service(&self, vs: VirtualService) -> WatchEvent {
        let mut inner = self.lock();
        let event = match inner.virtual_services.insert(vs.key(), vs.clone()) {
            Some(old) => WatchEvent::Updated { old, new: vs },
            None => WatchEvent::Created(vs),
        };
        self.publish(event.clone());
        event
    }

    /// Remove a VirtualService, emitting `Deleted` if it existed.
    pub fn remove_virtual_service(&self, key: &ObjectKey) -> Option<VirtualService> {
        let mut inner = self.lock();
        let removed = inner.virtual_services.remove(key)?;
        self.publish(WatchEvent::Deleted(removed.clone()));
        Some(removed)
    }

    /// Create or replace a ServiceEntry. ServiceEntries are not watched.
    pub fn put_service_entry(&self, se: ServiceEntry) {
        self.lock().service_entries.insert(se.key(), se);
    }

    /// Current stored copy of a VirtualService.
    pub fn virtual_service(&self, key: &ObjectKey) -> Option<VirtualService> {
        self.lock().virtual_services.get(key).cloned()
    }

    /// Make every subsequent create/update fail with a transient error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful create/update calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("writes are disabled".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list_virtual_services(&self) -> StoreResult<Vec<VirtualService>> {
        Ok(self.lock().virtual_services.values().cloned().collect())
    }

    async fn get_virtual_service(&self, key: &ObjectKey) -> StoreResult<VirtualService> {
        self.lock()
            .virtual_services
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: VIRTUAL_SERVICE,
                key: key.clone(),
            })
    }

    async fn get_service_entry(&self, key: &ObjectKey) -> StoreResult<ServiceEntry> {
        self.lock()
            .service_entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: SERVICE_ENTRY,
                key: key.clone(),
            })
    }

    async fn create_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        self.check_writable()?;
        let key = vs.key();
        let mut inner = self.lock();
        if inner.virtual_services.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: VIRTUAL_SERVICE,
                key,
            });
        }
        inner.virtual_services.insert(key.clone(), vs.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.publish(WatchEvent::Created(vs.clone()));
        debug!(resource = %key, "created virtual service");
        Ok(())
    }

    async fn update_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        self.check_writable()?;
        let key = vs.key();
        let mut inner = self.lock();
        let Some(old) = inner.virtual_services.get(&key).cloned() else {
            return Err(StoreError::NotFound {
                kind: VIRTUAL_SERVICE,
                key,
            });
        };
        inner.virtual_services.insert(key.clone(), vs.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.publish(WatchEvent::Updated {
            old,
            new: vs.clone(),
        });
        debug!(resource = %key, "updated virtual service");
        Ok(())
    }

    async fn watch_virtual_services(&self) -> StoreResult<WatchStream> {
        // Snapshot and subscribe under one lock so no change falls in between.
        let (initial, rx) = {
            let inner = self.lock();
            let initial: Vec<WatchEvent> = inner
                .virtual_services
                .values()
                .cloned()
                .map(WatchEvent::Created)
                .collect();
            (initial, self.events.subscribe())
        };

        let live = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch fell behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(initial).chain(live).boxed())
    }
}
