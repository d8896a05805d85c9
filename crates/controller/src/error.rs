use meshroute_core::{ObjectKey, StoreError};
use thiserror::Error;

/// Errors that stop the controller from seeding its rule set.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fallback ServiceEntry {0} not found")]
    FallbackMissing(ObjectKey),

    #[error("fallback ServiceEntry {0} has no hosts")]
    FallbackHostMissing(ObjectKey),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
