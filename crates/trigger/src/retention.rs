//! Expiry of rows no window can reach any more.
//!
//! - schedule entries: once both created and due before the longer of the
//!   scheduler and trigger windows
//! - dispatch claims: once older than one trigger window
//! - activities: after `activity_retention`, but never inside the
//!   anti-repeat or rollback look-back

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use chaos_rules::ChaosContext;

use crate::error::DispatchError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpiryReport {
    pub schedule: usize,
    pub activity: usize,
    pub claims: usize,
}

impl ExpiryReport {
    pub fn total(&self) -> usize {
        self.schedule + self.activity + self.claims
    }
}

/// Oldest timestamp each table still needs at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoffs {
    pub schedule: DateTime<Utc>,
    pub activity: DateTime<Utc>,
    pub claims: DateTime<Utc>,
}

impl Cutoffs {
    pub fn at(ctx: &ChaosContext, now: DateTime<Utc>, activity_retention: Duration) -> Self {
        let settings = &ctx.settings;
        let schedule = settings.scheduler_window().max(settings.trigger_window());
        let activity = activity_retention
            .max(settings.scheduler_window())
            .max(settings.rollback_delay() + settings.trigger_window());
        Self {
            schedule: now - schedule,
            activity: now - activity,
            claims: now - settings.trigger_window(),
        }
    }
}

pub async fn expire(
    ctx: &ChaosContext,
    now: DateTime<Utc>,
    activity_retention: Duration,
) -> Result<ExpiryReport, DispatchError> {
    let cutoffs = Cutoffs::at(ctx, now, activity_retention);
    debug!(?cutoffs, "expiring");
    let report = ExpiryReport {
        schedule: ctx.stores.schedule.expire(cutoffs.schedule).await?,
        activity: ctx.stores.activity.expire(cutoffs.activity).await?,
        claims: ctx.stores.dispatch.expire(cutoffs.claims).await?,
    };
    if report.total() > 0 {
        info!(
            schedule = report.schedule,
            activity = report.activity,
            claims = report.claims,
            "expired rows"
        );
    }
    Ok(report)
}
