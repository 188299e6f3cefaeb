use thiserror::Error;

use chaos_core::{ChaosError, KeyError};
use chaos_storage::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("nothing to select from: {0}")]
    EmptyPopulation(String),
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(#[from] StorageError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl From<RuleError> for ChaosError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::Configuration(msg) => ChaosError::Configuration(msg),
            RuleError::Store(s) => s.into(),
            RuleError::Key(k) => ChaosError::Key(k),
            RuleError::Selection(SelectionError::EmptyPopulation(what)) => ChaosError::EmptyPopulation(what),
        }
    }
}
