//! Rule engines: one selection strategy per chaos group.
//!
//! Every engine follows the same shape: read eligible inventory, derive the
//! anti-repeat set from the last scheduler window, apply the selection policy
//! and persist the chosen targets as one schedule batch under a fresh session
//! id. An empty selection writes nothing.

mod availability_sets;
mod availability_zones;
mod scale_sets;
mod virtual_machines;


use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::{info, warn};
use uuid::Uuid;

use chaos_core::{ChaosAction, CombinationKey, ResourceGroupKind, ResourceRecord, ScheduleBatch, ScheduleEntry};

use crate::context::ChaosContext;
use crate::error::RuleError;

pub use self::availability_sets::AvailabilitySetRuleEngine;
pub use self::availability_zones::AvailabilityZoneRuleEngine;
pub use self::scale_sets::ScaleSetRuleEngine;
pub use self::virtual_machines::VirtualMachineRuleEngine;

#[async_trait]
pub trait RuleEngine: Send + Sync {
    fn group(&self) -> ResourceGroupKind;

    /// Select targets and write their schedule entries.
    async fn run(&self, ctx: &ChaosContext, now: DateTime<Utc>, rng: &mut StdRng) -> Result<RuleRunReport, RuleError>;
}

/// Outcome of one rule-engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRunReport {
    pub group: ResourceGroupKind,
    /// Set only when a batch was written.
    pub session_id: Option<Uuid>,
    /// Eligible resources (or combinations) before selection.
    pub candidates: usize,
    pub scheduled: usize,
    /// Selected targets dropped because they could not be converted.
    pub skipped: usize,
    pub combination: Option<CombinationKey>,
}

impl RuleRunReport {
    pub fn nothing(group: ResourceGroupKind) -> Self {
        Self {
            group,
            session_id: None,
            candidates: 0,
            scheduled: 0,
            skipped: 0,
            combination: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.scheduled == 0
    }
}

/// The built-in engine of every group.
pub fn default_engines() -> Vec<Arc<dyn RuleEngine>> {
    vec![
        Arc::new(VirtualMachineRuleEngine),
        Arc::new(AvailabilitySetRuleEngine),
        Arc::new(ScaleSetRuleEngine),
        Arc::new(AvailabilityZoneRuleEngine),
    ]
}

/// Turn the selected records into entries and write them as one batch.
///
/// A record that cannot be converted is logged and skipped; a store failure
/// aborts the run.
pub(crate) async fn persist(
    ctx: &ChaosContext,
    group: ResourceGroupKind,
    candidates: usize,
    targets: &[ResourceRecord],
    combination: Option<&CombinationKey>,
    now: DateTime<Utc>,
) -> Result<RuleRunReport, RuleError> {
    let mut report = RuleRunReport {
        candidates,
        combination: combination.cloned(),
        ..RuleRunReport::nothing(group)
    };
    if targets.is_empty() {
        info!(group = %group, candidates, "nothing selected");
        return Ok(report);
    }

    let endpoint = ctx
        .settings
        .endpoint_for(group)
        .ok_or_else(|| RuleError::Configuration(format!("no executor endpoint for {group}")))?;
    let batch = ScheduleBatch {
        group,
        executor_endpoint: endpoint.to_string(),
        session_id: Uuid::new_v4(),
        created_at: now,
        scheduled_execution_time: now + ctx.settings.scheduler_window(),
    };

    let mut entries = Vec::with_capacity(targets.len());
    for record in targets {
        let action = ChaosAction::disrupting(record.power_state);
        match ScheduleEntry::new(&batch, record, action, combination.cloned()) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(group = %group, id = %record.id, error = %e, "skipping target");
                report.skipped += 1;
            }
        }
    }
    if entries.is_empty() {
        return Ok(report);
    }

    report.scheduled = ctx.stores.schedule.insert_batch(group, &entries).await?;
    report.session_id = Some(batch.session_id);
    info!(
        group = %group,
        session = %batch.session_id,
        scheduled = report.scheduled,
        skipped = report.skipped,
        at = %batch.scheduled_execution_time,
        "chaos scheduled"
    );
    Ok(report)
}
