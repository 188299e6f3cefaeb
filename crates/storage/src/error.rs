use thiserror::Error;

use chaos_core::{ChaosError, KeyError};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("batch for {expected} contains an entry of group {found}")]
    MixedBatch { expected: String, found: String },

    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for ChaosError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Key(k) => ChaosError::Key(k),
            StorageError::NotConfigured(msg) => ChaosError::Configuration(msg),
            StorageError::MixedBatch { .. } => ChaosError::Other(e.to_string()),
            other => ChaosError::TransientStore(other.to_string()),
        }
    }
}
