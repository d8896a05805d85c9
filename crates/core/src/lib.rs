//! Shared building blocks for the mesh route generator.
//!
//! - Routing rule and resource model (`VirtualService`, `ServiceEntry`, `HttpRoute`)
//! - Configuration loaded from TOML with `MESHROUTE_*` env overrides
//! - The `ResourceStore` collaborator trait and an in-memory implementation

pub mod config;
pub mod error;
pub mod model;
pub mod store;

pub use config::{Config, DuplicatePolicy};
pub use error::*;
pub use model::*;
pub use store::{InMemoryStore, ResourceStore, WatchEvent, WatchStream};
