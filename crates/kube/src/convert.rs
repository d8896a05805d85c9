//! Mapping between untyped `DynamicObject`s and the controller's model.

use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use meshroute_core::{ObjectKey, ObjectMeta, ServiceEntry, StoreError, StoreResult, VirtualService};
use serde_json::Value;

pub const ISTIO_GROUP: &str = "networking.istio.io";
pub const ISTIO_VERSION: &str = "v1beta1";

pub fn virtual_service_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(ISTIO_GROUP, ISTIO_VERSION, "VirtualService"))
}

pub fn service_entry_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(ISTIO_GROUP, ISTIO_VERSION, "ServiceEntry"))
}

fn object_key(obj: &DynamicObject) -> ObjectKey {
    ObjectKey::new(
        obj.metadata.namespace.clone().unwrap_or_default(),
        obj.metadata.name.clone().unwrap_or_default(),
    )
}

fn model_meta(obj: &DynamicObject) -> ObjectMeta {
    ObjectMeta {
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        labels: obj.metadata.labels.clone().unwrap_or_default(),
    }
}

fn decode_spec<T: serde::de::DeserializeOwned>(obj: &DynamicObject) -> StoreResult<T> {
    let spec = obj
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(spec).map_err(|e| StoreError::Decode {
        key: object_key(obj),
        message: e.to_string(),
    })
}

pub fn to_virtual_service(obj: &DynamicObject) -> StoreResult<VirtualService> {
    Ok(VirtualService {
        metadata: model_meta(obj),
        spec: decode_spec(obj)?,
    })
}

pub fn to_service_entry(obj: &DynamicObject) -> StoreResult<ServiceEntry> {
    Ok(ServiceEntry {
        metadata: model_meta(obj),
        spec: decode_spec(obj)?,
    })
}

/// Build the object to send for a create or replace.
///
/// No resource version is set, so a replace is unconditional.
pub fn from_virtual_service(vs: &VirtualService) -> StoreResult<DynamicObject> {
    let spec = serde_json::to_value(&vs.spec).map_err(|e| StoreError::Decode {
        key: vs.key(),
        message: e.to_string(),
    })?;
    let mut obj = DynamicObject::new(&vs.metadata.name, &virtual_service_resource())
        .within(&vs.metadata.namespace)
        .data(serde_json::json!({ "spec": spec }));
    if !vs.metadata.labels.is_empty() {
        obj.metadata.labels = Some(vs.metadata.labels.clone());
    }
    Ok(obj)
}
