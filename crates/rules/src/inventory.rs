use chrono::{DateTime, Utc};
use tracing::debug;

use chaos_core::{ResourceGroupFilter, ResourceGroupKind, ResourceRecord};
use chaos_storage::{InventoryStore, StorageError};

/// Read-only view of crawler output that hides resources in filtered-out
/// resource groups.
#[derive(Clone)]
pub struct InventoryReader {
    store: InventoryStore,
    filter: ResourceGroupFilter,
}

impl InventoryReader {
    pub fn new(store: InventoryStore, filter: ResourceGroupFilter) -> Self {
        Self { store, filter }
    }

    /// Eligible records of `group` seen at or after `since`.
    pub async fn query(
        &self,
        group: ResourceGroupKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResourceRecord>, StorageError> {
        let records = self.store.query(group, since).await?;
        let total = records.len();
        let eligible: Vec<ResourceRecord> = records
            .into_iter()
            .filter(|r| self.filter.allows(&r.resource_group_name))
            .collect();
        debug!(group = %group, total, eligible = eligible.len(), "inventory read");
        Ok(eligible)
    }

    /// Like [`query`](Self::query), keeping only records matching `predicate`.
    pub async fn query_where<F>(
        &self,
        group: ResourceGroupKind,
        since: Option<DateTime<Utc>>,
        predicate: F,
    ) -> Result<Vec<ResourceRecord>, StorageError>
    where
        F: Fn(&ResourceRecord) -> bool,
    {
        let records = self.query(group, since).await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    pub async fn get(&self, group: ResourceGroupKind, id: &str) -> Result<Option<ResourceRecord>, StorageError> {
        Ok(self
            .store
            .get(group, id)
            .await?
            .filter(|r| self.filter.allows(&r.resource_group_name)))
    }
}

#[cfg(test)]
mod tests {
    use chaos_core::ResourceKind;
    use chaos_storage::StorageBackend;

    use super::*;

    fn vm(rg: &str, name: &str) -> ResourceRecord {
        ResourceRecord::new(
            ResourceGroupKind::VirtualMachines,
            ResourceKind::VirtualMachine,
            format!("/subscriptions/s/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{name}"),
        )
    }

    async fn seeded(filter: ResourceGroupFilter) -> InventoryReader {
        let store = InventoryStore::new(&StorageBackend::memory());
        for r in [vm("rg-prod", "a"), vm("rg-test", "b"), vm("RG-Test", "c")] {
            store.upsert(&r).await.unwrap();
        }
        InventoryReader::new(store, filter)
    }

    #[tokio::test]
    async fn black_listed_groups_are_hidden() {
        let reader = seeded(ResourceGroupFilter::from_lists(&[], &["RG-PROD".into()])).await;
        let records = reader.query(ResourceGroupKind::VirtualMachines, None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.resource_group_name != "rg-prod"));

        let prod = vm("rg-prod", "a");
        assert!(reader.get(ResourceGroupKind::VirtualMachines, &prod.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inclusive_list_limits_results() {
        let reader = seeded(ResourceGroupFilter::from_lists(&["rg-test".into()], &[])).await;
        let records = reader.query(ResourceGroupKind::VirtualMachines, None).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn predicate_narrows_results() {
        let reader = seeded(ResourceGroupFilter::All).await;
        let only_a = reader
            .query_where(ResourceGroupKind::VirtualMachines, None, |r| r.name == "a")
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
    }
}
