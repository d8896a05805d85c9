//! The resource store / watch collaborator.
//!
//! The controller never talks to a concrete backend directly. It reads and
//! writes VirtualServices and ServiceEntries through [`ResourceStore`] and
//! consumes change notifications as a stream of [`WatchEvent`]s.

mod memory;


use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreResult;
use crate::model::{ObjectKey, ServiceEntry, VirtualService};

pub use self::memory::InMemoryStore;

/// Kind name used in errors and logs for VirtualServices.
pub const VIRTUAL_SERVICE: &str = "VirtualService";
/// Kind name used in errors and logs for ServiceEntries.
pub const SERVICE_ENTRY: &str = "ServiceEntry";

/// A change to a VirtualService, as delivered by the watch subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Created(VirtualService),
    Updated {
        old: VirtualService,
        new: VirtualService,
    },
    Deleted(VirtualService),
}

impl WatchEvent {
    /// Identity of the resource the event is about.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Created(vs) | Self::Deleted(vs) => vs.key(),
            Self::Updated { new, .. } => new.key(),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Unbounded stream of watch events. Ends when the watch is torn down.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Read/write access to the cluster state the controller depends on.
///
/// Implementations deliver the full current state as `Created` events at the
/// start of every watch. After a reconnect they report only what changed
/// while disconnected.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List VirtualServices across every namespace, in store order.
    async fn list_virtual_services(&self) -> StoreResult<Vec<VirtualService>>;

    /// Fetch one VirtualService; `StoreError::NotFound` if absent.
    async fn get_virtual_service(&self, key: &ObjectKey) -> StoreResult<VirtualService>;

    /// Fetch one ServiceEntry; `StoreError::NotFound` if absent.
    async fn get_service_entry(&self, key: &ObjectKey) -> StoreResult<ServiceEntry>;

    /// Create a VirtualService; `StoreError::AlreadyExists` if present.
    async fn create_virtual_service(&self, vs: &VirtualService) -> StoreResult<()>;

    /// Replace a VirtualService wholesale.
    async fn update_virtual_service(&self, vs: &VirtualService) -> StoreResult<()>;

    /// Start watching VirtualServices in every namespace.
    ///
    /// The stream first reports every resource present at call time as
    /// created, then each later change, including deletions of resources
    /// from that first snapshot.
    async fn watch_virtual_services(&self) -> StoreResult<WatchStream>;
}

/// Blanket implementation so `Arc<dyn ResourceStore>` can be used directly.
#[async_trait]
impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    async fn list_virtual_services(&self) -> StoreResult<Vec<VirtualService>> {
        (**self).list_virtual_services().await
    }

    async fn get_virtual_service(&self, key: &ObjectKey) -> StoreResult<VirtualService> {
        (**self).get_virtual_service(key).await
    }

    async fn get_service_entry(&self, key: &ObjectKey) -> StoreResult<ServiceEntry> {
        (**self).get_service_entry(key).await
    }

    async fn create_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        (**self).create_virtual_service(vs).await
    }

    async fn update_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        (**self).update_virtual_service(vs).await
    }

    async fn watch_virtual_services(&self) -> StoreResult<WatchStream> {
        (**self).watch_virtual_services().await
    }
}
