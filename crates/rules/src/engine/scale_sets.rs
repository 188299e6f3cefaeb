use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::{debug, info};

use chaos_core::{ResourceGroupKind, ResourceKind, ResourceRecord};

use super::{persist, RuleEngine, RuleRunReport};
use crate::anti_repeat::recent_resource_keys;
use crate::context::ChaosContext;
use crate::error::RuleError;
use crate::selection::{exclude_recent, percentage_select, random_one};

/// Scale sets: pick one scale set that has instances, then a percentage of
/// its instances not touched recently.
pub struct ScaleSetRuleEngine;

#[async_trait]
impl RuleEngine for ScaleSetRuleEngine {
    fn group(&self) -> ResourceGroupKind {
        ResourceGroupKind::ScaleSets
    }

    async fn run(&self, ctx: &ChaosContext, now: DateTime<Utc>, rng: &mut StdRng) -> Result<RuleRunReport, RuleError> {
        let group = self.group();
        let records = ctx.inventory().query(group, ctx.settings.inventory_since(now)).await?;

        let sets: Vec<&ResourceRecord> = records
            .iter()
            .filter(|r| r.kind == ResourceKind::ScaleSet && r.has_children)
            .collect();
        let set = match random_one(&sets, rng) {
            Ok(set) => *set,
            Err(_) => {
                info!(group = %group, "no scale set with instances");
                return Ok(RuleRunReport::nothing(group));
            }
        };

        let instances: Vec<ResourceRecord> = records
            .iter()
            .filter(|r| {
                r.kind == ResourceKind::ScaleSetVm
                    && r.scale_set_id
                        .as_deref()
                        .is_some_and(|id| id.eq_ignore_ascii_case(&set.id))
            })
            .cloned()
            .collect();

        let recent = recent_resource_keys(
            &ctx.stores.schedule,
            &ctx.stores.activity,
            group,
            &ctx.recent_window(now),
        )
        .await?;
        let eligible = exclude_recent(&instances, &recent);
        debug!(group = %group, scale_set = %set.id, instances = instances.len(), eligible = eligible.len(), "scale set picked");

        let targets = percentage_select(&eligible, ctx.settings.percentage_for(group), rng);
        persist(ctx, group, eligible.len(), &targets, None, now).await
    }
}
