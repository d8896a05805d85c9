//! [`ResourceStore`] backed by the Kubernetes API server.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use meshroute_core::store::{SERVICE_ENTRY, VIRTUAL_SERVICE};
use meshroute_core::{
    ObjectKey, ResourceStore, ServiceEntry, StoreError, StoreResult, VirtualService, WatchStream,
};
use tracing::{debug, info, warn};

use crate::convert::{
    from_virtual_service, service_entry_resource, to_service_entry, to_virtual_service,
    virtual_service_resource,
};
use crate::watch::WatchCache;

/// Map a client error onto the store's error model.
pub(crate) fn store_error(kind: &'static str, key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            kind,
            key: key.clone(),
        },
        kube::Error::Api(resp) if resp.code == 409 => StoreError::AlreadyExists {
            kind,
            key: key.clone(),
        },
        other => StoreError::Transient(other.to_string()),
    }
}

/// Istio VirtualServices and ServiceEntries, read and written as untyped
/// objects so no Istio CRD crate is needed.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    virtual_services: ApiResource,
    service_entries: ApiResource,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            virtual_services: virtual_service_resource(),
            service_entries: service_entry_resource(),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn connect() -> kube::Result<Self> {
        let client = Client::try_default().await?;
        info!(
            namespace = client.default_namespace(),
            "connected to kubernetes API server"
        );
        Ok(Self::new(client))
    }

    fn virtual_services_in(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.virtual_services)
    }

    fn all_virtual_services(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.virtual_services)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_virtual_services(&self) -> StoreResult<Vec<VirtualService>> {
        let list = self
            .all_virtual_services()
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let mut resources = Vec::with_capacity(list.items.len());
        for obj in &list.items {
            match to_virtual_service(obj) {
                Ok(vs) => resources.push(vs),
                Err(e) => warn!(error = %e, "skipping undecodable virtual service"),
            }
        }
        debug!(count = resources.len(), "listed virtual services");
        Ok(resources)
    }

    async fn get_virtual_service(&self, key: &ObjectKey) -> StoreResult<VirtualService> {
        let obj = self
            .virtual_services_in(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| store_error(VIRTUAL_SERVICE, key, e))?;
        to_virtual_service(&obj)
    }

    async fn get_service_entry(&self, key: &ObjectKey) -> StoreResult<ServiceEntry> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, &self.service_entries);
        let obj = api
            .get(&key.name)
            .await
            .map_err(|e| store_error(SERVICE_ENTRY, key, e))?;
        to_service_entry(&obj)
    }

    async fn create_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        let key = vs.key();
        let obj = from_virtual_service(vs)?;
        self.virtual_services_in(&key.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| store_error(VIRTUAL_SERVICE, &key, e))?;
        Ok(())
    }

    async fn update_virtual_service(&self, vs: &VirtualService) -> StoreResult<()> {
        let key = vs.key();
        let obj = from_virtual_service(vs)?;
        self.virtual_services_in(&key.namespace)
            .replace(&key.name, &PostParams::default(), &obj)
            .await
            .map_err(|e| store_error(VIRTUAL_SERVICE, &key, e))?;
        Ok(())
    }

    /// Lists once up front, so the replay reflects the cluster at call time.
    /// The watcher's own first list is then diffed against that snapshot.
    async fn watch_virtual_services(&self) -> StoreResult<WatchStream> {
        let mut cache = WatchCache::default();
        let initial = cache.prime(self.list_virtual_services().await?);

        let live = watcher(self.all_virtual_services(), watcher::Config::default())
            .default_backoff()
            .scan(cache, |cache, item| {
                let events = match item {
                    Ok(event) => cache.apply(event),
                    Err(e) => {
                        warn!(error = %e, "virtual service watch error, retrying");
                        Vec::new()
                    }
                };
                futures::future::ready(Some(futures::stream::iter(events)))
            })
            .flatten();
        Ok(futures::stream::iter(initial).chain(live).boxed())
    }
}
