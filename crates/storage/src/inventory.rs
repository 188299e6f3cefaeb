use chrono::{DateTime, Utc};

use chaos_core::{key, ResourceGroupKind, ResourceRecord};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::table::TableStore;

pub const INVENTORY_TABLE: &str = "inventory";

/// Crawler output, partitioned by chaos group.
#[derive(Clone)]
pub struct InventoryStore {
    table: TableStore,
}

impl InventoryStore {
    pub fn new(backend: &StorageBackend) -> Self {
        Self {
            table: TableStore::new(backend, INVENTORY_TABLE),
        }
    }

    /// Write path used by the crawler and by tests.
    pub async fn upsert(&self, record: &ResourceRecord) -> Result<(), StorageError> {
        self.table.put(record.group_key(), &record.key()?, record).await
    }

    /// Records of `group`, optionally only those seen at or after `since`.
    pub async fn query(
        &self,
        group: ResourceGroupKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResourceRecord>, StorageError> {
        let records: Vec<ResourceRecord> = self.table.scan(Some(group.as_str())).await?;
        Ok(records
            .into_iter()
            .filter(|r| since.map_or(true, |s| r.last_seen_at >= s))
            .collect())
    }

    pub async fn get(&self, group: ResourceGroupKind, id: &str) -> Result<Option<ResourceRecord>, StorageError> {
        self.table.get(group.as_str(), &key::encode(id)?).await
    }
}
