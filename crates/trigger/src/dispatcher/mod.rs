//! Dispatches due chaos and due rollbacks to executor endpoints.
//!
//! Each tick resolves two sets before starting anything:
//! - forward: schedule entries with `scheduledExecutionTime` in
//!   `[now, now + triggerFrequency)`
//! - rollback: completed, non-rollback activities with `eventCompletedAt` in
//!   `(now - rollbackFrequency - triggerFrequency, now - rollbackFrequency]`
//!
//! Both sets leave out what the dispatch ledger already holds. Every
//! invocation is claimed in the ledger before it starts, so an entry or
//! activity is handed to an executor at most once however often the tick
//! runs. A claim whose invocation could not be started is released for the
//! next tick.
//!
//! A failure resolving either set aborts the tick. Once resolved, each
//! invocation is started independently: an unknown endpoint or a failure to
//! start one never blocks the others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chaos_core::{
    ActivityStatus, ActivityTimeField, ChaosAction, ChaosSettings, EventActivity, ResourceGroupKind, ResourceKind,
    ScheduleTimeField, TimeWindow, TriggerPayload,
};
use chaos_rules::ChaosContext;
use chaos_storage::{DispatchLedger, InvocationSource};

use crate::error::DispatchError;
use crate::invoker::ExecutorInvoker;

/// One resolved executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub source: InvocationSource,
    /// Ledger key: the schedule row key, or the activity id.
    pub key: String,
    pub endpoint: String,
    pub target_id: String,
    pub payload: String,
}

/// Counts for one dispatcher tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub forward: usize,
    pub rollback: usize,
    /// Unknown endpoint, or no endpoint could be resolved.
    pub skipped: usize,
    /// The invoker refused or failed to start the call.
    pub failed: usize,
    /// Claimed by an earlier tick between resolving and claiming.
    pub already_dispatched: usize,
}

impl DispatchReport {
    pub fn dispatched(&self) -> usize {
        self.forward + self.rollback
    }
}

pub struct Dispatcher {
    invoker: Arc<dyn ExecutorInvoker>,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn ExecutorInvoker>) -> Self {
        Self { invoker }
    }

    /// One trigger tick.
    pub async fn tick(&self, ctx: &ChaosContext, now: DateTime<Utc>) -> Result<DispatchReport, DispatchError> {
        let mut invocations = self.forward_entries(ctx, now).await?;
        invocations.extend(self.rollback_entries(ctx, now).await?);

        let mut report = DispatchReport::default();
        if invocations.is_empty() {
            debug!("nothing due");
            return Ok(report);
        }

        let ledger = &ctx.stores.dispatch;
        for invocation in invocations {
            match ledger.claim(invocation.source, &invocation.key, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(source = %invocation.source, key = %invocation.key, "already dispatched");
                    report.already_dispatched += 1;
                    continue;
                }
                Err(e) => {
                    warn!(source = %invocation.source, key = %invocation.key, error = %e, "claim failed, not dispatched");
                    report.failed += 1;
                    continue;
                }
            }

            match self.invoker.invoke(&invocation.endpoint, invocation.payload).await {
                Ok(()) => {
                    debug!(source = %invocation.source, endpoint = %invocation.endpoint, target = %invocation.target_id, "invocation started");
                    match invocation.source {
                        InvocationSource::Forward => report.forward += 1,
                        InvocationSource::Rollback => report.rollback += 1,
                    }
                }
                // stays claimed: the endpoint will not appear later
                Err(DispatchError::UnknownEndpoint(endpoint)) => {
                    info!(source = %invocation.source, endpoint = %endpoint, target = %invocation.target_id, "unknown executor endpoint, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(source = %invocation.source, endpoint = %invocation.endpoint, target = %invocation.target_id, error = %e, "invocation not started");
                    release(ledger, invocation.source, &invocation.key).await;
                    report.failed += 1;
                }
            }
        }

        info!(
            forward = report.forward,
            rollback = report.rollback,
            skipped = report.skipped,
            failed = report.failed,
            already_dispatched = report.already_dispatched,
            "dispatch tick"
        );
        Ok(report)
    }

    /// Schedule entries due within this tick and not dispatched yet.
    pub async fn forward_entries(&self, ctx: &ChaosContext, now: DateTime<Utc>) -> Result<Vec<Invocation>, DispatchError> {
        let window = TimeWindow::half_open(now, now + ctx.settings.trigger_window());
        let entries = ctx
            .stores
            .schedule
            .query_by_time_window(None, ScheduleTimeField::ScheduledExecutionTime, &window)
            .await?;

        let mut invocations = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.row_key();
            if ctx.stores.dispatch.is_claimed(InvocationSource::Forward, &key).await? {
                continue;
            }
            invocations.push(Invocation {
                source: InvocationSource::Forward,
                key,
                endpoint: entry.executor_endpoint,
                target_id: entry.target_key,
                payload: entry.trigger_payload,
            });
        }
        Ok(invocations)
    }

    /// Inverse actions for activities that completed one rollback delay ago
    /// and were not rolled back yet.
    pub async fn rollback_entries(&self, ctx: &ChaosContext, now: DateTime<Utc>) -> Result<Vec<Invocation>, DispatchError> {
        let end = now - ctx.settings.rollback_delay();
        let window = TimeWindow::open_closed(end - ctx.settings.trigger_window(), end);
        let activities = ctx
            .stores
            .activity
            .query_by_time_window(ActivityTimeField::EventCompletedAt, &window)
            .await?;

        let mut invocations = Vec::new();
        for activity in activities.iter().filter(|a| a.status == ActivityStatus::Completed && !a.rollback) {
            let key = activity.id.to_string();
            if ctx.stores.dispatch.is_claimed(InvocationSource::Rollback, &key).await? {
                continue;
            }
            let Some(payload) = rollback_payload(activity) else {
                warn!(activity = %activity.id, state = %activity.initial_state, "no inverse action, not rolled back");
                continue;
            };
            let Some(endpoint) = rollback_endpoint(&ctx.settings, activity) else {
                warn!(activity = %activity.id, "no executor endpoint for rollback");
                continue;
            };
            let payload = match payload.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(activity = %activity.id, error = %e, "rollback payload not serializable");
                    continue;
                }
            };
            invocations.push(Invocation {
                source: InvocationSource::Rollback,
                key,
                endpoint: endpoint.to_string(),
                target_id: activity.target_id.clone(),
                payload,
            });
        }
        Ok(invocations)
    }
}

async fn release(ledger: &DispatchLedger, source: InvocationSource, key: &str) {
    if let Err(e) = ledger.release(source, key).await {
        warn!(source = %source, key, error = %e, "claim not released, entry will not be retried");
    }
}

/// The payload that restores the power state recorded in `activity`.
///
/// `None` when the initial state has no inverse. The resource group comes
/// from the activity's `resourceGroupName`.
pub fn rollback_payload(activity: &EventActivity) -> Option<TriggerPayload> {
    let action = ChaosAction::inverse_of(activity.initial_state)?;
    Some(TriggerPayload {
        action,
        resource_name: activity.resource_name.clone(),
        resource_group: activity.resource_group_name.clone(),
        target_id: activity.target_id.clone(),
        group: activity.group,
        rollback: true,
    })
}

fn rollback_endpoint<'a>(settings: &'a ChaosSettings, activity: &EventActivity) -> Option<&'a str> {
    let group = activity.group.unwrap_or_else(|| {
        if activity.resource_type.eq_ignore_ascii_case(ResourceKind::ScaleSetVm.resource_type()) {
            ResourceGroupKind::ScaleSets
        } else {
            ResourceGroupKind::VirtualMachines
        }
    });
    settings.endpoint_for(group)
}

#[cfg(test)]
mod tests;
