//! Data model shared by every crate in the workspace.

mod resource;
mod route;

#[cfg(test)]
mod tests;

pub use self::resource::{
    LabelSelector, ObjectKey, ObjectMeta, ServiceEntry, ServiceEntrySpec, VirtualService,
    VirtualServiceSpec,
};
pub use self::route::{
    Destination, HttpMatchRequest, HttpRoute, HttpRouteDestination, PortSelector, StringMatch,
};
