use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::info;

use chaos_core::{KeyError, ResourceGroupKind, ResourceRecord};

use super::{persist, RuleEngine, RuleRunReport};
use crate::anti_repeat::recent_combinations;
use crate::context::ChaosContext;
use crate::error::RuleError;
use crate::selection::{domain_combinations, domain_of, select_combination};

/// Availability sets: pick one `(set, domain)` combination on the configured
/// axis that was not hit recently and schedule every VM in that domain.
pub struct AvailabilitySetRuleEngine;

#[async_trait]
impl RuleEngine for AvailabilitySetRuleEngine {
    fn group(&self) -> ResourceGroupKind {
        ResourceGroupKind::AvailabilitySets
    }

    async fn run(&self, ctx: &ChaosContext, now: DateTime<Utc>, rng: &mut StdRng) -> Result<RuleRunReport, RuleError> {
        let group = self.group();
        let axis = ctx.settings.availability_sets.domain_axis().ok_or_else(|| {
            RuleError::Configuration("exactly one of fault domain or update domain must be enabled".into())
        })?;

        let records = ctx
            .inventory()
            .query_where(group, ctx.settings.inventory_since(now), |r| r.availability_set_id.is_some())
            .await?;
        let candidates = domain_combinations(&records, axis);
        let recent = recent_combinations(&ctx.stores.schedule, group, &ctx.recent_window(now), Some(axis)).await?;

        let Some(combination) = select_combination(&candidates, &recent, Some(axis), rng) else {
            info!(group = %group, axis = %axis, candidates = candidates.len(), recent = recent.len(), "no fresh domain");
            return Ok(RuleRunReport {
                candidates: candidates.len(),
                ..RuleRunReport::nothing(group)
            });
        };
        let (set_id, domain) = combination
            .set_and_domain()
            .ok_or_else(|| KeyError::MalformedCombination(combination.to_string()))?;

        let targets: Vec<ResourceRecord> = records
            .into_iter()
            .filter(|r| {
                r.availability_set_id
                    .as_deref()
                    .is_some_and(|id| id.eq_ignore_ascii_case(&set_id))
                    && domain_of(r, axis) == Some(domain)
            })
            .collect();
        info!(group = %group, set = %set_id, axis = %axis, domain, vms = targets.len(), "domain picked");

        persist(ctx, group, candidates.len(), &targets, Some(&combination), now).await
    }
}
