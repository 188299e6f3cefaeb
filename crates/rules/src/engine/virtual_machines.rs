use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::debug;

use chaos_core::{ResourceGroupKind, ResourceKind};

use super::{persist, RuleEngine, RuleRunReport};
use crate::anti_repeat::recent_resource_keys;
use crate::context::ChaosContext;
use crate::error::RuleError;
use crate::selection::{exclude_recent, percentage_select};

/// Standalone VMs: a percentage of the VMs not touched recently.
pub struct VirtualMachineRuleEngine;

#[async_trait]
impl RuleEngine for VirtualMachineRuleEngine {
    fn group(&self) -> ResourceGroupKind {
        ResourceGroupKind::VirtualMachines
    }

    async fn run(&self, ctx: &ChaosContext, now: DateTime<Utc>, rng: &mut StdRng) -> Result<RuleRunReport, RuleError> {
        let group = self.group();
        let inventory = ctx
            .inventory()
            .query_where(group, ctx.settings.inventory_since(now), |r| {
                r.kind == ResourceKind::VirtualMachine
            })
            .await?;
        let recent = recent_resource_keys(
            &ctx.stores.schedule,
            &ctx.stores.activity,
            group,
            &ctx.recent_window(now),
        )
        .await?;

        let eligible = exclude_recent(&inventory, &recent);
        debug!(group = %group, inventory = inventory.len(), eligible = eligible.len(), "virtual machines");

        let targets = percentage_select(&eligible, ctx.settings.percentage_for(group), rng);
        persist(ctx, group, eligible.len(), &targets, None, now).await
    }
}
