use chaos_core::ChaosError;
use chaos_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] StorageError),

    #[error("unknown executor endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("invoker is shutting down")]
    ShuttingDown,
}

impl From<DispatchError> for ChaosError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Store(s) => s.into(),
            DispatchError::UnknownEndpoint(name) => ChaosError::Configuration(format!("unknown executor endpoint '{name}'")),
            DispatchError::ShuttingDown => ChaosError::Other("invoker is shutting down".into()),
        }
    }
}
