//! Anti-repetition: what was chaos-tested recently must not be picked again.

use std::collections::HashSet;

use tracing::debug;

use chaos_core::{
    key, ActivityTimeField, CombinationKey, DomainAxis, ResourceGroupKind, ScheduleTimeField, TimeWindow,
};
use chaos_storage::{ActivityStore, ScheduleStore, StorageError};

/// Store keys of resources that have a schedule entry of `group` created in
/// `window`, or any activity logged in `window`.
pub async fn recent_resource_keys(
    schedule: &ScheduleStore,
    activity: &ActivityStore,
    group: ResourceGroupKind,
    window: &TimeWindow,
) -> Result<HashSet<String>, StorageError> {
    let mut keys: HashSet<String> = schedule
        .query_by_time_window(Some(group), ScheduleTimeField::CreatedAt, window)
        .await?
        .into_iter()
        .map(|e| e.target_key)
        .collect();
    let scheduled = keys.len();

    let activities = activity
        .query_by_time_window(ActivityTimeField::EntryDate, window)
        .await?;
    keys.extend(activities.iter().filter_map(|a| key::encode(&a.target_id).ok()));

    debug!(group = %group, scheduled, total = keys.len(), "recent resources");
    Ok(keys)
}

/// Combination keys of `group` entries created in `window`, restricted to
/// the given domain axis (`None` for zone combinations).
pub async fn recent_combinations(
    schedule: &ScheduleStore,
    group: ResourceGroupKind,
    window: &TimeWindow,
    axis: Option<DomainAxis>,
) -> Result<HashSet<CombinationKey>, StorageError> {
    let entries = schedule
        .query_by_time_window(Some(group), ScheduleTimeField::CreatedAt, window)
        .await?;
    Ok(entries
        .into_iter()
        .filter_map(|e| e.combination_key)
        .filter(|c| c.axis() == axis)
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use chaos_core::{
        ChaosAction, EventActivity, PowerState, ResourceKind, ResourceRecord, ScheduleBatch, ScheduleEntry,
        TriggerPayload,
    };
    use chaos_storage::{StorageBackend, Stores};

    use super::*;

    fn set_vm(name: &str) -> ResourceRecord {
        ResourceRecord::new(
            ResourceGroupKind::AvailabilitySets,
            ResourceKind::VirtualMachine,
            format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}"),
        )
    }

    #[tokio::test]
    async fn schedule_and_activity_both_count() {
        let stores = Stores::new(&StorageBackend::memory(), 4);
        let now = Utc::now();
        let group = ResourceGroupKind::AvailabilitySets;
        let batch = ScheduleBatch {
            group,
            executor_endpoint: "virtualmachinesexecuter".into(),
            session_id: Uuid::new_v4(),
            created_at: now - Duration::minutes(10),
            scheduled_execution_time: now + Duration::minutes(50),
        };
        let scheduled = set_vm("a");
        let entry = ScheduleEntry::new(&batch, &scheduled, ChaosAction::PowerOff, None).unwrap();
        stores.schedule.insert_batch(group, &[entry]).await.unwrap();

        let acted = set_vm("b");
        let activity = EventActivity::started(
            &TriggerPayload::for_record(&acted, ChaosAction::PowerOff),
            acted.resource_type(),
            PowerState::Running,
            now - Duration::minutes(5),
        );
        stores.activity.upsert(&activity).await.unwrap();

        let window = TimeWindow::closed(now - Duration::minutes(60), now);
        let keys = recent_resource_keys(&stores.schedule, &stores.activity, group, &window)
            .await
            .unwrap();
        assert!(keys.contains(&scheduled.key().unwrap()));
        assert!(keys.contains(&acted.key().unwrap()));
        assert!(!keys.contains(&set_vm("c").key().unwrap()));
    }

    #[tokio::test]
    async fn combinations_are_filtered_by_axis_and_window() {
        let stores = Stores::new(&StorageBackend::memory(), 4);
        let now = Utc::now();
        let group = ResourceGroupKind::AvailabilitySets;
        let fault = CombinationKey::availability_set("as1", DomainAxis::Fault, 1).unwrap();
        let update = CombinationKey::availability_set("as1", DomainAxis::Update, 1).unwrap();
        let old = CombinationKey::availability_set("as1", DomainAxis::Fault, 2).unwrap();

        for (name, combo, age) in [("a", &fault, 10), ("b", &update, 10), ("c", &old, 120)] {
            let batch = ScheduleBatch {
                group,
                executor_endpoint: "virtualmachinesexecuter".into(),
                session_id: Uuid::new_v4(),
                created_at: now - Duration::minutes(age),
                scheduled_execution_time: now,
            };
            let entry = ScheduleEntry::new(&batch, &set_vm(name), ChaosAction::PowerOff, Some(combo.clone())).unwrap();
            stores.schedule.insert_batch(group, &[entry]).await.unwrap();
        }

        let window = TimeWindow::closed(now - Duration::minutes(60), now);
        let recent = recent_combinations(&stores.schedule, group, &window, Some(DomainAxis::Fault))
            .await
            .unwrap();
        assert_eq!(recent, HashSet::from([fault]));
    }
}
