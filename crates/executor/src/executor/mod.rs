//! The executor state machine.
//!
//! `Received -> Validated -> Started -> Completed | Failed`, or `Rejected`
//! before anything is written. Every path past validation leaves exactly one
//! activity row behind; action errors are recorded there and never returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use chaos_core::{ChaosAction, EventActivity, PowerState, TriggerPayload};
use chaos_storage::ActivityStore;

use crate::control::{ResourceControl, ResourceStatus};
use crate::error::{ControlError, ExecutorError};

const TERMINAL_WRITE_ATTEMPTS: u32 = 4;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Bad payload or missing resource; nothing was recorded.
    Rejected { reason: String },
    /// The action makes no sense in the current power state.
    InvalidAction(EventActivity),
    Completed(EventActivity),
    Failed(EventActivity),
}

impl ExecutionOutcome {
    pub fn activity(&self) -> Option<&EventActivity> {
        match self {
            ExecutionOutcome::Rejected { .. } => None,
            ExecutionOutcome::InvalidAction(a) | ExecutionOutcome::Completed(a) | ExecutionOutcome::Failed(a) => Some(a),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Rejected { .. } => "rejected",
            ExecutionOutcome::InvalidAction(_) => "invalid_action",
            ExecutionOutcome::Completed(_) => "completed",
            ExecutionOutcome::Failed(_) => "failed",
        }
    }
}

pub struct Executor {
    name: String,
    control: Arc<dyn ResourceControl>,
    activities: ActivityStore,
}

impl Executor {
    pub fn new(name: impl Into<String>, control: Arc<dyn ResourceControl>, activities: ActivityStore) -> Self {
        Self {
            name: name.into(),
            control,
            activities,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `action` would change a resource currently in `state`.
    pub fn is_valid_chaos(action: ChaosAction, state: PowerState) -> bool {
        match action {
            ChaosAction::Start => !matches!(state, PowerState::Running | PowerState::Starting),
            ChaosAction::Stop | ChaosAction::PowerOff | ChaosAction::Restart => {
                !matches!(state, PowerState::Stopping | PowerState::Stopped)
            }
        }
    }

    /// Handle one serialized trigger payload.
    pub async fn execute(&self, raw: &str) -> Result<ExecutionOutcome, ExecutorError> {
        match TriggerPayload::parse(raw) {
            Ok(payload) => self.execute_payload(&payload).await,
            Err(e) => {
                warn!(executor = %self.name, error = %e, "payload rejected");
                Ok(ExecutionOutcome::Rejected { reason: e.to_string() })
            }
        }
    }

    pub async fn execute_payload(&self, payload: &TriggerPayload) -> Result<ExecutionOutcome, ExecutorError> {
        if let Err(e) = payload.validate() {
            warn!(executor = %self.name, error = %e, "payload rejected");
            return Ok(ExecutionOutcome::Rejected { reason: e.to_string() });
        }

        let resource = match self.control.get_by_resource_id(&payload.target_id).await {
            Ok(resource) => resource,
            Err(e) => {
                if e.is_not_found() {
                    info!(executor = %self.name, target = %payload.target_id, "resource not found");
                } else {
                    warn!(executor = %self.name, target = %payload.target_id, error = %e, "resource lookup failed");
                }
                return Ok(ExecutionOutcome::Rejected { reason: e.to_string() });
            }
        };

        if !Self::is_valid_chaos(payload.action, resource.power_state) {
            let activity =
                EventActivity::invalid_action(payload, &resource.resource_type, resource.power_state, Utc::now());
            self.activities.upsert(&activity).await?;
            info!(
                executor = %self.name,
                target = %payload.target_id,
                action = %payload.action,
                state = %resource.power_state,
                "invalid action"
            );
            return Ok(ExecutionOutcome::InvalidAction(activity));
        }

        let mut activity = EventActivity::started(payload, &resource.resource_type, resource.power_state, Utc::now());
        self.activities.upsert(&activity).await?;
        info!(
            executor = %self.name,
            activity = %activity.id,
            target = %payload.target_id,
            action = %payload.action,
            rollback = payload.rollback,
            "chaos started"
        );

        let outcome = match self.perform(payload.action, &resource).await {
            Ok(final_state) => {
                activity.complete(final_state, Utc::now());
                info!(executor = %self.name, activity = %activity.id, state = %final_state, "chaos completed");
                ExecutionOutcome::Completed(activity)
            }
            Err(e) => {
                activity.fail(e.to_string(), Utc::now());
                warn!(executor = %self.name, activity = %activity.id, error = %e, "chaos failed");
                ExecutionOutcome::Failed(activity)
            }
        };
        self.record_terminal(outcome).await
    }

    /// Write the terminal activity. The action already ran, so the write is
    /// retried with backoff; a final failure still carries the outcome.
    async fn record_terminal(&self, outcome: ExecutionOutcome) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(activity) = outcome.activity() else {
            return Ok(outcome);
        };
        let mut attempt = 1;
        loop {
            match self.activities.upsert(activity).await {
                Ok(()) => return Ok(outcome),
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    let backoff = TERMINAL_WRITE_BACKOFF * 2u32.pow(attempt - 1);
                    warn!(executor = %self.name, activity = %activity.id, attempt, error = %e, "terminal activity write failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        executor = %self.name,
                        activity = %activity.id,
                        outcome = outcome.label(),
                        error = %e,
                        "terminal activity not recorded"
                    );
                    return Err(ExecutorError::Unrecorded {
                        outcome: Box::new(outcome),
                        source: e,
                    });
                }
            }
        }
    }

    /// Run the action and read the resulting power state.
    async fn perform(&self, action: ChaosAction, resource: &ResourceStatus) -> Result<PowerState, ControlError> {
        match action {
            ChaosAction::Start => self.control.start(&resource.id).await?,
            ChaosAction::Stop => self.control.stop(&resource.id).await?,
            ChaosAction::PowerOff => self.control.power_off(&resource.id).await?,
            ChaosAction::Restart => self.control.restart(&resource.id).await?,
        }
        Ok(self.control.get_by_resource_id(&resource.id).await?.power_state)
    }
}
