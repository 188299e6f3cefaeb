use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::info;

use chaos_core::{KeyError, ResourceGroupKind, ResourceRecord};

use super::{persist, RuleEngine, RuleRunReport};
use crate::anti_repeat::recent_combinations;
use crate::context::ChaosContext;
use crate::error::RuleError;
use crate::selection::{select_combination, zone_combinations};

/// Availability zones: pick one `(region, zone)` in the configured regions
/// that was not hit recently and schedule every VM in it.
pub struct AvailabilityZoneRuleEngine;

#[async_trait]
impl RuleEngine for AvailabilityZoneRuleEngine {
    fn group(&self) -> ResourceGroupKind {
        ResourceGroupKind::AvailabilityZones
    }

    async fn run(&self, ctx: &ChaosContext, now: DateTime<Utc>, rng: &mut StdRng) -> Result<RuleRunReport, RuleError> {
        let group = self.group();
        let records = ctx
            .inventory()
            .query_where(group, ctx.settings.inventory_since(now), |r| r.availability_zone.is_some())
            .await?;
        let candidates = zone_combinations(&records, &ctx.settings.availability_zones.regions);
        let recent = recent_combinations(&ctx.stores.schedule, group, &ctx.recent_window(now), None).await?;

        let Some(combination) = select_combination(&candidates, &recent, None, rng) else {
            info!(group = %group, candidates = candidates.len(), "no fresh zone");
            return Ok(RuleRunReport {
                candidates: candidates.len(),
                ..RuleRunReport::nothing(group)
            });
        };
        let parts = combination.split()?;
        let [region, zone] = parts.as_slice() else {
            return Err(KeyError::MalformedCombination(combination.to_string()).into());
        };

        let targets: Vec<ResourceRecord> = records
            .iter()
            .filter(|r| r.region_name.eq_ignore_ascii_case(region) && r.availability_zone.as_deref() == Some(zone.as_str()))
            .cloned()
            .collect();
        info!(group = %group, region = %region, zone = %zone, vms = targets.len(), "zone picked");

        persist(ctx, group, candidates.len(), &targets, Some(&combination), now).await
    }
}
