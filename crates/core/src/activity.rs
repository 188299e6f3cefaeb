use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::{PowerState, ResourceGroupKind};
use crate::schedule::{ChaosAction, TriggerPayload};

pub const INVALID_ACTION_WARNING: &str = "Invalid Action";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityStatus {
    Started,
    Completed,
    Failed,
}

/// Audit record of one executor invocation. Updated in place until it reaches
/// `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActivity {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<ResourceGroupKind>,
    pub resource_group_name: String,
    pub resource_name: String,
    pub target_id: String,
    pub resource_type: String,
    pub action: ChaosAction,
    pub initial_state: PowerState,
    #[serde(default)]
    pub final_state: Option<PowerState>,
    pub status: ActivityStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub rollback: bool,
    pub entry_date: DateTime<Utc>,
    pub event_started_at: DateTime<Utc>,
    #[serde(default)]
    pub event_completed_at: Option<DateTime<Utc>>,
}

impl EventActivity {
    fn from_payload(
        payload: &TriggerPayload,
        resource_type: &str,
        initial_state: PowerState,
        status: ActivityStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group: payload.group,
            resource_group_name: payload.resource_group.clone(),
            resource_name: payload.resource_name.clone(),
            target_id: payload.target_id.clone(),
            resource_type: resource_type.to_string(),
            action: payload.action,
            initial_state,
            final_state: None,
            status,
            error: None,
            warning: None,
            rollback: payload.rollback,
            entry_date: now,
            event_started_at: now,
            event_completed_at: None,
        }
    }

    /// Activity for an action that passed validation and is about to run.
    pub fn started(payload: &TriggerPayload, resource_type: &str, initial_state: PowerState, now: DateTime<Utc>) -> Self {
        Self::from_payload(payload, resource_type, initial_state, ActivityStatus::Started, now)
    }

    /// Terminal activity for an action that is not valid in the current state.
    pub fn invalid_action(
        payload: &TriggerPayload,
        resource_type: &str,
        initial_state: PowerState,
        now: DateTime<Utc>,
    ) -> Self {
        let mut activity = Self::from_payload(payload, resource_type, initial_state, ActivityStatus::Failed, now);
        activity.warning = Some(INVALID_ACTION_WARNING.to_string());
        activity.event_completed_at = Some(now);
        activity
    }

    pub fn complete(&mut self, final_state: PowerState, now: DateTime<Utc>) {
        self.status = ActivityStatus::Completed;
        self.final_state = Some(final_state);
        self.event_completed_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = ActivityStatus::Failed;
        self.error = Some(error.into());
        self.event_completed_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ActivityStatus::Completed | ActivityStatus::Failed)
    }
}

/// Timestamp columns an activity query can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTimeField {
    EntryDate,
    EventStartedAt,
    EventCompletedAt,
}

impl ActivityTimeField {
    pub fn value(&self, activity: &EventActivity) -> Option<DateTime<Utc>> {
        match self {
            ActivityTimeField::EntryDate => Some(activity.entry_date),
            ActivityTimeField::EventStartedAt => Some(activity.event_started_at),
            ActivityTimeField::EventCompletedAt => activity.event_completed_at,
        }
    }
}
