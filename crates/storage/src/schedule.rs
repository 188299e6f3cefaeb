use chrono::{DateTime, Utc};
use tracing::debug;

use chaos_core::{ResourceGroupKind, ScheduleEntry, ScheduleTimeField, TimeWindow};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::table::TableStore;

pub const SCHEDULE_TABLE: &str = "schedule";

/// Planned chaos actions, partitioned by group. Entries are written once.
#[derive(Clone)]
pub struct ScheduleStore {
    table: TableStore,
    max_concurrency: usize,
}

impl ScheduleStore {
    pub fn new(backend: &StorageBackend, max_concurrency: usize) -> Self {
        Self {
            table: TableStore::new(backend, SCHEDULE_TABLE),
            max_concurrency,
        }
    }

    /// Persist one rule-engine run. Every entry must belong to `group`.
    pub async fn insert_batch(&self, group: ResourceGroupKind, entries: &[ScheduleEntry]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }
        if let Some(stray) = entries.iter().find(|e| e.group != group) {
            return Err(StorageError::MixedBatch {
                expected: group.to_string(),
                found: stray.group.to_string(),
            });
        }
        let rows: Vec<(String, &ScheduleEntry)> = entries.iter().map(|e| (e.row_key(), e)).collect();
        let written = self.table.put_batch(group.as_str(), &rows, self.max_concurrency).await?;
        debug!(group = %group, written, "schedule batch stored");
        Ok(written)
    }

    /// Entries whose `field` falls inside `window`, for one group or all.
    pub async fn query_by_time_window(
        &self,
        group: Option<ResourceGroupKind>,
        field: ScheduleTimeField,
        window: &TimeWindow,
    ) -> Result<Vec<ScheduleEntry>, StorageError> {
        let entries: Vec<ScheduleEntry> = self.table.scan(group.map(|g| g.as_str())).await?;
        Ok(entries
            .into_iter()
            .filter(|e| window.contains(field.value(e)))
            .collect())
    }

    /// Delete entries both created and due before `cutoff`.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.table
            .delete_where::<ScheduleEntry, _>(None, |e| e.created_at < cutoff && e.scheduled_execution_time < cutoff)
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    use chaos_core::{ChaosAction, ResourceKind, ResourceRecord, ScheduleBatch};

    use super::*;
    use crate::testing::FaultyStore;

    fn entries(group: ResourceGroupKind, n: usize, created_at: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let batch = ScheduleBatch {
            group,
            executor_endpoint: "virtualmachinesexecuter".into(),
            session_id: Uuid::new_v4(),
            created_at,
            scheduled_execution_time: created_at + Duration::minutes(60),
        };
        (0..n)
            .map(|i| {
                let r = ResourceRecord::new(
                    group,
                    ResourceKind::VirtualMachine,
                    format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm{i}"),
                );
                ScheduleEntry::new(&batch, &r, ChaosAction::PowerOff, None).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn insert_and_query_window() {
        let store = ScheduleStore::new(&StorageBackend::memory(), 20);
        let now = Utc::now();
        let vm = ResourceGroupKind::VirtualMachines;
        assert_eq!(store.insert_batch(vm, &entries(vm, 3, now)).await.unwrap(), 3);
        store
            .insert_batch(vm, &entries(vm, 2, now - Duration::hours(5)))
            .await
            .unwrap();

        let recent = store
            .query_by_time_window(
                Some(vm),
                ScheduleTimeField::CreatedAt,
                &TimeWindow::closed(now - Duration::minutes(60), now),
            )
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);

        let due = store
            .query_by_time_window(
                None,
                ScheduleTimeField::ScheduledExecutionTime,
                &TimeWindow::half_open(now + Duration::minutes(50), now + Duration::minutes(65)),
            )
            .await
            .unwrap();
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn expire_keeps_entries_still_due() {
        let store = ScheduleStore::new(&StorageBackend::memory(), 20);
        let now = Utc::now();
        let vm = ResourceGroupKind::VirtualMachines;
        // created 3h ago, due 2h ago
        store
            .insert_batch(vm, &entries(vm, 2, now - Duration::hours(3)))
            .await
            .unwrap();
        // created 90m ago, due 30m ago
        store
            .insert_batch(vm, &entries(vm, 1, now - Duration::minutes(90)))
            .await
            .unwrap();

        assert_eq!(store.expire(now - Duration::minutes(60)).await.unwrap(), 2);
        let left = store
            .query_by_time_window(None, ScheduleTimeField::CreatedAt, &TimeWindow::closed(now - Duration::days(1), now))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_not_partially_visible() {
        let (store, backend) = FaultyStore::new().into_backend();
        let schedule = ScheduleStore::new(&backend, 2);
        let vm = ResourceGroupKind::VirtualMachines;
        let now = Utc::now();
        store.fail_puts_after(120);

        assert!(schedule.insert_batch(vm, &entries(vm, 250, now)).await.is_err());
        let visible = schedule
            .query_by_time_window(Some(vm), ScheduleTimeField::CreatedAt, &TimeWindow::closed(now, now))
            .await
            .unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let store = ScheduleStore::new(&StorageBackend::memory(), 20);
        assert_eq!(store.insert_batch(ResourceGroupKind::ScaleSets, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mixed_batch_is_rejected() {
        let store = ScheduleStore::new(&StorageBackend::memory(), 20);
        let batch = entries(ResourceGroupKind::VirtualMachines, 1, Utc::now());
        let err = store
            .insert_batch(ResourceGroupKind::ScaleSets, &batch)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MixedBatch { .. }));
    }
}
