//! Errors of the resource-control boundary and the executor.

use chaos_core::ChaosError;
use chaos_storage::StorageError;

use crate::executor::ExecutionOutcome;

/// Failures talking to the cloud control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ControlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::NotFound(_))
    }
}

/// Failures that escape [`Executor::execute`](crate::Executor::execute).
///
/// Action failures never do: they end up in the activity log.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("activity store error: {0}")]
    Store(#[from] StorageError),

    #[error("unknown executor endpoint '{0}'")]
    UnknownEndpoint(String),

    /// The action ran but its terminal activity could not be written.
    #[error("{} activity not recorded: {source}", outcome.label())]
    Unrecorded {
        outcome: Box<ExecutionOutcome>,
        source: StorageError,
    },
}

impl ExecutorError {
    /// The outcome of an action that ran, if this error carries one.
    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        match self {
            ExecutorError::Unrecorded { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

impl From<ExecutorError> for ChaosError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Store(s) => s.into(),
            ExecutorError::UnknownEndpoint(name) => ChaosError::Configuration(format!("unknown executor endpoint '{name}'")),
            ExecutorError::Unrecorded { source, .. } => source.into(),
        }
    }
}
