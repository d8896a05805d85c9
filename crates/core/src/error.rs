use thiserror::Error;

use crate::model::ObjectKey;

/// Errors reported by a [`ResourceStore`](crate::store::ResourceStore).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// Any other store failure (network, API server, permissions).
    #[error("store error: {0}")]
    Transient(String),

    /// The stored object could not be mapped onto the model.
    #[error("decode error for {key}: {message}")]
    Decode { key: ObjectKey, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
