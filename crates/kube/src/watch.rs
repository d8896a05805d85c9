//! Turning raw watcher events into created/updated/deleted notifications.
//!
//! The API server watch only says "this object now looks like X". To report
//! an update with its previous version, and to notice objects that vanished
//! while the watch was relisting, the last seen version of every object is
//! cached here.

use std::collections::{BTreeMap, BTreeSet};

use kube::api::DynamicObject;
use kube::runtime::watcher::Event;
use meshroute_core::{ObjectKey, VirtualService, WatchEvent};
use tracing::{debug, warn};

use crate::convert::to_virtual_service;

#[derive(Debug, Default)]
pub struct WatchCache {
    known: BTreeMap<ObjectKey, VirtualService>,
    /// Keys seen since the current relist began, if one is in progress.
    relisting: Option<BTreeSet<ObjectKey>>,
}

impl WatchCache {
    /// Fold one watcher event into the cache, returning what changed.
    pub fn apply(&mut self, event: Event<DynamicObject>) -> Vec<WatchEvent> {
        match event {
            Event::Init => {
                debug!(known = self.known.len(), "virtual service relist started");
                self.relisting = Some(BTreeSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let Some(vs) = decode(&obj) else {
                    return Vec::new();
                };
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(vs.key());
                }
                self.upsert(vs).into_iter().collect()
            }
            Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let vanished: Vec<ObjectKey> = self
                    .known
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                debug!(
                    listed = seen.len(),
                    vanished = vanished.len(),
                    "virtual service relist done"
                );
                vanished
                    .into_iter()
                    .filter_map(|k| self.known.remove(&k))
                    .map(WatchEvent::Deleted)
                    .collect()
            }
            Event::Apply(obj) => match decode(&obj) {
                Some(vs) => self.upsert(vs).into_iter().collect(),
                None => Vec::new(),
            },
            Event::Delete(obj) => {
                let Some(vs) = decode(&obj) else {
                    return Vec::new();
                };
                // Prefer the cached copy: it is what was last reported.
                let last = self.known.remove(&vs.key()).unwrap_or(vs);
                vec![WatchEvent::Deleted(last)]
            }
        }
    }

    /// Record a listing taken outside the watcher, reporting each object as
    /// created. A later relist that lacks one of them reports it deleted.
    pub fn prime(&mut self, resources: Vec<VirtualService>) -> Vec<WatchEvent> {
        resources
            .into_iter()
            .filter_map(|vs| self.upsert(vs))
            .collect()
    }

    fn upsert(&mut self, vs: VirtualService) -> Option<WatchEvent> {
        match self.known.insert(vs.key(), vs.clone()) {
            None => Some(WatchEvent::Created(vs)),
            Some(old) if old != vs => Some(WatchEvent::Updated { old, new: vs }),
            Some(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

fn decode(obj: &DynamicObject) -> Option<VirtualService> {
    match to_virtual_service(obj) {
        Ok(vs) => Some(vs),
        Err(e) => {
            warn!(error = %e, "ignoring undecodable virtual service");
            None
        }
    }
}
