//! Kubernetes-backed [`ResourceStore`](meshroute_core::ResourceStore).
//!
//! Talks to the API server through `kube` using untyped objects for the
//! Istio `networking.istio.io/v1beta1` kinds.

pub mod convert;
pub mod store;
pub mod watch;

pub use store::KubeStore;
pub use watch::WatchCache;
