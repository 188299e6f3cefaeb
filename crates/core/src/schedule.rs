use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChaosError;
use crate::key::CombinationKey;
use crate::resource::{PowerState, ResourceGroupKind, ResourceRecord};

/// Power action the executor can perform against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChaosAction {
    Start,
    Stop,
    PowerOff,
    Restart,
}

impl ChaosAction {
    /// The action that brings a resource back to `initial`.
    ///
    /// Transitional states count as the state they are heading to. `Unknown`
    /// has no inverse.
    pub fn inverse_of(initial: PowerState) -> Option<Self> {
        match initial {
            PowerState::Running | PowerState::Starting => Some(ChaosAction::Start),
            PowerState::Stopped
            | PowerState::Stopping
            | PowerState::Deallocated
            | PowerState::Deallocating => Some(ChaosAction::PowerOff),
            PowerState::Unknown => None,
        }
    }

    /// The disruptive action scheduled for a resource currently in `state`:
    /// running machines are powered off, stopped ones are started.
    pub fn disrupting(state: PowerState) -> Self {
        match state {
            PowerState::Stopped
            | PowerState::Stopping
            | PowerState::Deallocated
            | PowerState::Deallocating => ChaosAction::Start,
            PowerState::Running | PowerState::Starting | PowerState::Unknown => ChaosAction::PowerOff,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosAction::Start => "Start",
            ChaosAction::Stop => "Stop",
            ChaosAction::PowerOff => "PowerOff",
            ChaosAction::Restart => "Restart",
        }
    }
}

impl fmt::Display for ChaosAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized body of one executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub action: ChaosAction,
    pub resource_name: String,
    pub resource_group: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<ResourceGroupKind>,
    #[serde(default)]
    pub rollback: bool,
}

impl TriggerPayload {
    pub fn for_record(record: &ResourceRecord, action: ChaosAction) -> Self {
        Self {
            action,
            resource_name: record.name.clone(),
            resource_group: record.resource_group_name.clone(),
            target_id: record.id.clone(),
            group: Some(record.group),
            rollback: false,
        }
    }

    /// Deserialize and validate a payload received at the executor boundary.
    pub fn parse(raw: &str) -> Result<Self, ChaosError> {
        let payload: TriggerPayload = serde_json::from_str(raw)
            .map_err(|e| ChaosError::InvalidPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), ChaosError> {
        for (field, value) in [
            ("resourceName", &self.resource_name),
            ("resourceGroup", &self.resource_group),
            ("targetId", &self.target_id),
        ] {
            if value.trim().is_empty() {
                return Err(ChaosError::InvalidPayload(format!("{field} is empty")));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ChaosError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A planned chaos action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub group: ResourceGroupKind,
    pub target_key: String,
    pub action: ChaosAction,
    pub executor_endpoint: String,
    pub scheduled_execution_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination_key: Option<CombinationKey>,
    pub trigger_payload: String,
}

/// Everything about an entry that is shared by one rule-engine run.
#[derive(Debug, Clone)]
pub struct ScheduleBatch {
    pub group: ResourceGroupKind,
    pub executor_endpoint: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub scheduled_execution_time: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Build an entry for one selected record. Fails if the record id cannot
    /// be key-encoded.
    pub fn new(
        batch: &ScheduleBatch,
        record: &ResourceRecord,
        action: ChaosAction,
        combination_key: Option<CombinationKey>,
    ) -> Result<Self, ChaosError> {
        let target_key = record.key()?;
        let mut payload = TriggerPayload::for_record(record, action);
        payload.group = Some(batch.group);
        Ok(Self {
            group: batch.group,
            target_key,
            action,
            executor_endpoint: batch.executor_endpoint.clone(),
            scheduled_execution_time: batch.scheduled_execution_time,
            created_at: batch.created_at,
            session_id: batch.session_id,
            combination_key,
            trigger_payload: payload.to_json()?,
        })
    }

    /// Row key inside the group partition; unique per session and target.
    pub fn row_key(&self) -> String {
        format!("{}_{}", self.session_id, self.target_key)
    }

    pub fn payload(&self) -> Result<TriggerPayload, ChaosError> {
        TriggerPayload::parse(&self.trigger_payload)
    }
}

/// Timestamp columns a schedule query can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTimeField {
    ScheduledExecutionTime,
    CreatedAt,
}

impl ScheduleTimeField {
    pub fn value(&self, entry: &ScheduleEntry) -> DateTime<Utc> {
        match self {
            ScheduleTimeField::ScheduledExecutionTime => entry.scheduled_execution_time,
            ScheduleTimeField::CreatedAt => entry.created_at,
        }
    }
}
