use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use chaos_core::{ResourceGroupKind, ScheduleTimeField};

use crate::context::ChaosContext;
use crate::engine::{default_engines, RuleEngine, RuleRunReport};
use crate::error::RuleError;

/// Owns one [`RuleEngine`] per group and the RNG that drives group picking.
///
/// The RNG lock is never held across an await: each tick draws a seed for the
/// engine run and releases it.
pub struct ChaosScheduler {
    engines: HashMap<ResourceGroupKind, Arc<dyn RuleEngine>>,
    rng: Mutex<StdRng>,
}

impl ChaosScheduler {
    /// Scheduler with the built-in engines and an entropy-seeded RNG.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic scheduler, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let engines = default_engines().into_iter().map(|e| (e.group(), e)).collect();
        Self {
            engines,
            rng: Mutex::new(rng),
        }
    }

    /// Replace the engine of the group `engine` reports.
    pub fn with_engine(mut self, engine: Arc<dyn RuleEngine>) -> Self {
        self.engines.insert(engine.group(), engine);
        self
    }

    /// Enabled groups without a schedule entry created in
    /// `[now - schedulerFrequency, now]`.
    pub async fn eligible_groups(
        &self,
        ctx: &ChaosContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceGroupKind>, RuleError> {
        let enabled = ctx.settings.enabled_groups();
        if enabled.is_empty() {
            return Ok(enabled);
        }

        let recent: BTreeSet<ResourceGroupKind> = ctx
            .stores
            .schedule
            .query_by_time_window(None, ScheduleTimeField::CreatedAt, &ctx.recent_window(now))
            .await?
            .into_iter()
            .map(|e| e.group)
            .collect();
        debug!(enabled = enabled.len(), recent = recent.len(), "group eligibility");

        Ok(enabled.into_iter().filter(|g| !recent.contains(g)).collect())
    }

    /// One scheduler tick. `None` when chaos is disabled or every enabled
    /// group was scheduled within the window.
    pub async fn tick(&self, ctx: &ChaosContext, now: DateTime<Utc>) -> Result<Option<RuleRunReport>, RuleError> {
        if !ctx.settings.enabled {
            debug!("chaos disabled");
            return Ok(None);
        }

        let eligible = self.eligible_groups(ctx, now).await?;
        let (group, seed) = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| RuleError::Configuration("scheduler rng poisoned".into()))?;
            match eligible.choose(&mut *rng) {
                Some(group) => (*group, rng.gen::<u64>()),
                None => {
                    info!("no eligible group");
                    return Ok(None);
                }
            }
        };

        let engine = self
            .engines
            .get(&group)
            .ok_or_else(|| RuleError::Configuration(format!("no rule engine for {group}")))?;
        info!(group = %group, eligible = eligible.len(), "running rule engine");

        let mut rng = StdRng::seed_from_u64(seed);
        engine.run(ctx, now, &mut rng).await.map(Some)
    }
}

impl Default for ChaosScheduler {
    fn default() -> Self {
        Self::new()
    }
}
