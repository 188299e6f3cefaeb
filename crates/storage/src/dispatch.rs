use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::table::TableStore;

pub const DISPATCH_TABLE: &str = "dispatch";

/// What an executor invocation was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationSource {
    /// A schedule entry came due.
    Forward,
    /// A completed activity is being undone.
    Rollback,
}

impl InvocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationSource::Forward => "forward",
            InvocationSource::Rollback => "rollback",
        }
    }
}

impl fmt::Display for InvocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchClaim {
    pub source: InvocationSource,
    pub key: String,
    pub claimed_at: DateTime<Utc>,
}

/// Which schedule entries and activities have already been handed to an
/// executor. Forward claims are keyed by schedule row key, rollback claims
/// by activity id.
#[derive(Clone)]
pub struct DispatchLedger {
    table: TableStore,
}

impl DispatchLedger {
    pub fn new(backend: &StorageBackend) -> Self {
        Self {
            table: TableStore::new(backend, DISPATCH_TABLE),
        }
    }

    /// Record `key` as dispatched. `false` when it already was.
    pub async fn claim(&self, source: InvocationSource, key: &str, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let claim = DispatchClaim {
            source,
            key: key.to_string(),
            claimed_at: now,
        };
        self.table.put_if_absent(source.as_str(), key, &claim).await
    }

    /// Forget a claim whose invocation never started.
    pub async fn release(&self, source: InvocationSource, key: &str) -> Result<(), StorageError> {
        self.table.delete(source.as_str(), key).await
    }

    pub async fn is_claimed(&self, source: InvocationSource, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .table
            .get::<DispatchClaim>(source.as_str(), key)
            .await?
            .is_some())
    }

    /// Drop claims made before `cutoff`.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.table
            .delete_where::<DispatchClaim, _>(None, |c| c.claimed_at < cutoff)
            .await
    }
}
