use chrono::{DateTime, Utc};

use chaos_core::{key, ActivityTimeField, EventActivity, TimeWindow};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::table::TableStore;

pub const ACTIVITY_TABLE: &str = "activity";

/// Executor audit log, partitioned by resource group.
#[derive(Clone)]
pub struct ActivityStore {
    table: TableStore,
}

impl ActivityStore {
    pub fn new(backend: &StorageBackend) -> Self {
        Self {
            table: TableStore::new(backend, ACTIVITY_TABLE),
        }
    }

    fn partition(activity: &EventActivity) -> Result<String, StorageError> {
        Ok(key::encode(&activity.resource_group_name.to_ascii_lowercase())?)
    }

    /// Insert or replace by activity id.
    pub async fn upsert(&self, activity: &EventActivity) -> Result<(), StorageError> {
        self.table
            .put(&Self::partition(activity)?, &activity.id.to_string(), activity)
            .await
    }

    pub async fn query_by_time_window(
        &self,
        field: ActivityTimeField,
        window: &TimeWindow,
    ) -> Result<Vec<EventActivity>, StorageError> {
        let activities: Vec<EventActivity> = self.table.scan(None).await?;
        Ok(activities
            .into_iter()
            .filter(|a| field.value(a).is_some_and(|t| window.contains(t)))
            .collect())
    }

    /// Delete activities whose last timestamp is before `cutoff`.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.table
            .delete_where::<EventActivity, _>(None, |a| {
                a.event_completed_at.map_or(a.entry_date, |c| c.max(a.entry_date)) < cutoff
            })
            .await
    }
}
