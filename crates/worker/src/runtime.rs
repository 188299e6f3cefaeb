//! Tick loops and the one-shot commands built on them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chaos_core::{ChaosSettings, Config};
use chaos_executor::{ExecutorRegistry, ResourceControl};
use chaos_rules::{ChaosContext, ChaosScheduler, RuleRunReport};
use chaos_storage::Stores;
use chaos_trigger::{expire, DispatchReport, Dispatcher, LocalInvoker};

/// Long-lived state shared by both loops.
///
/// Settings are re-read at every tick; the executor endpoint table and the
/// trigger period are fixed when the runtime is built.
pub struct Runtime {
    config: Config,
    trigger_period: Duration,
    stores: Stores,
    scheduler: ChaosScheduler,
    invoker: Arc<LocalInvoker>,
    dispatcher: Dispatcher,
}

impl Runtime {
    pub fn new(config: Config, stores: Stores, control: Arc<dyn ResourceControl>) -> Result<Self> {
        let settings = load_settings(&config)?;
        let registry = ExecutorRegistry::for_settings(&settings, control, &stores.activity);
        info!(endpoints = registry.len(), "executor endpoints registered");
        let invoker = Arc::new(LocalInvoker::new(registry, config.worker.max_concurrency));
        Ok(Self {
            trigger_period: trigger_period(&config, &settings),
            dispatcher: Dispatcher::new(invoker.clone()),
            invoker,
            scheduler: ChaosScheduler::new(),
            config,
            stores,
        })
    }

    /// Fresh context with the current settings document.
    pub fn context(&self) -> Result<ChaosContext> {
        Ok(ChaosContext::new(load_settings(&self.config)?, self.stores.clone()))
    }

    pub async fn scheduler_tick(&self) -> Result<Option<RuleRunReport>> {
        let ctx = self.context()?;
        Ok(self.scheduler.tick(&ctx, Utc::now()).await?)
    }

    /// Dispatch what is due, then expire rows no window reaches any more.
    /// A failed expiry is logged and left for the next tick.
    pub async fn trigger_tick(&self) -> Result<DispatchReport> {
        let ctx = self.context()?;
        let now = Utc::now();
        let report = self.dispatcher.tick(&ctx, now).await?;
        if let Err(e) = expire(&ctx, now, self.config.worker.activity_retention()).await {
            warn!(error = %e, "expiry failed");
        }
        Ok(report)
    }

    /// Wait for executor invocations already started.
    pub async fn shutdown(&self) {
        self.invoker.shutdown().await;
    }

    /// Both loops until `shutdown` is cancelled, then drain the executors.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let scheduler_period = Duration::from_secs(self.config.worker.scheduler_tick_secs);
        let trigger_period = self.trigger_period;
        info!(
            scheduler_secs = scheduler_period.as_secs(),
            trigger_secs = trigger_period.as_secs(),
            "chaos worker running"
        );

        let scheduler = {
            let rt = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tick_loop("scheduler", scheduler_period, shutdown, move || {
                    let rt = rt.clone();
                    async move {
                        match rt.scheduler_tick().await {
                            Ok(Some(report)) => info!(
                                group = %report.group,
                                scheduled = report.scheduled,
                                candidates = report.candidates,
                                "scheduler tick"
                            ),
                            Ok(None) => debug!("scheduler tick: nothing to do"),
                            Err(e) => error!(error = %e, "scheduler tick aborted"),
                        }
                    }
                })
                .await
            })
        };
        let trigger = {
            let rt = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tick_loop("trigger", trigger_period, shutdown, move || {
                    let rt = rt.clone();
                    async move {
                        if let Err(e) = rt.trigger_tick().await {
                            error!(error = %e, "trigger tick aborted");
                        }
                    }
                })
                .await
            })
        };

        for (name, handle) in [("scheduler", scheduler), ("trigger", trigger)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "loop task panicked");
            }
        }
        self.shutdown().await;
        info!("chaos worker stopped");
    }
}

/// Run `tick` every `period` until cancelled. A started tick always runs to
/// completion and never overlaps the next one; ticks missed meanwhile are
/// skipped.
async fn tick_loop<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let started = Instant::now();
        tick().await;
        let elapsed = started.elapsed();
        if elapsed > period {
            warn!(
                tick = name,
                elapsed_ms = elapsed.as_millis() as u64,
                period_secs = period.as_secs(),
                "tick overran its period"
            );
        }
    }
    debug!(tick = name, "loop stopped");
}

/// The configured trigger period, or one trigger window. A period longer than
/// the window would leave gaps between windows, so it is capped.
fn trigger_period(config: &Config, settings: &ChaosSettings) -> Duration {
    let window = Duration::from_secs(u64::from(settings.trigger_frequency) * 60);
    match config.worker.trigger_tick_secs.map(Duration::from_secs) {
        Some(period) if period > window => {
            warn!(
                period_secs = period.as_secs(),
                window_secs = window.as_secs(),
                "trigger tick longer than the trigger window, using the window"
            );
            window
        }
        Some(period) => period,
        None => window,
    }
}

pub fn load_settings(config: &Config) -> Result<ChaosSettings> {
    let path = &config.worker.settings_path;
    ChaosSettings::load(path).with_context(|| format!("failed to load chaos settings from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use chaos_core::{PowerState, ResourceGroupFilter, ResourceGroupKind, ResourceKind, ResourceRecord};
    use chaos_executor::{ControlError, ResourceStatus};
    use chaos_storage::StorageBackend;

    use super::*;

    struct NoCloud;

    #[async_trait]
    impl ResourceControl for NoCloud {
        async fn get_by_resource_id(&self, id: &str) -> Result<ResourceStatus, ControlError> {
            Err(ControlError::NotFound(id.to_string()))
        }
        async fn start(&self, _id: &str) -> Result<(), ControlError> {
            Ok(())
        }
        async fn power_off(&self, _id: &str) -> Result<(), ControlError> {
            Ok(())
        }
        async fn restart(&self, _id: &str) -> Result<(), ControlError> {
            Ok(())
        }
        async fn list_resource_groups(&self, _filter: &ResourceGroupFilter) -> Result<Vec<String>, ControlError> {
            Ok(Vec::new())
        }
    }

    const SETTINGS: &str = r#"{
        "microsoft.chaos.enabled": true,
        "microsoft.chaos.scheduler.frequency": 60,
        "microsoft.chaos.trigger.frequency": 15,
        "microsoft.chaos.rollback.fequency": 60,
        "microsoft.chaos.VM": {
            "microsoft.chaos.VM.enabled": true,
            "microsoft.chaos.VM.percentageTermination": 50
        }
    }"#;

    fn runtime(settings: &str) -> (Runtime, tempfile::NamedTempFile) {
        runtime_with(settings, None)
    }

    fn runtime_with(settings: &str, trigger_tick_secs: Option<u64>) -> (Runtime, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(settings.as_bytes()).unwrap();
        let mut config = Config::for_profile("WORKERTEST");
        config.worker.settings_path = file.path().to_path_buf();
        config.worker.trigger_tick_secs = trigger_tick_secs;
        let stores = Stores::new(&StorageBackend::memory(), 4);
        (Runtime::new(config, stores, Arc::new(NoCloud)).unwrap(), file)
    }

    #[tokio::test]
    async fn scheduler_tick_uses_settings_file() {
        let (rt, _file) = runtime(SETTINGS);
        for i in 0..4 {
            let record = ResourceRecord::new(
                ResourceGroupKind::VirtualMachines,
                ResourceKind::VirtualMachine,
                format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-{i}"),
            )
            .with_power_state(PowerState::Running);
            rt.stores.inventory.upsert(&record).await.unwrap();
        }

        let report = rt.scheduler_tick().await.unwrap().unwrap();
        assert_eq!(report.group, ResourceGroupKind::VirtualMachines);
        assert_eq!(report.scheduled, 2);
    }

    #[tokio::test]
    async fn trigger_tick_with_nothing_due() {
        let (rt, _file) = runtime(SETTINGS);
        let report = rt.trigger_tick().await.unwrap();
        assert_eq!(report.dispatched(), 0);
        rt.shutdown().await;
    }

    #[test]
    fn invalid_settings_fail_to_build() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"microsoft.chaos.scheduler.frequency": 0}"#).unwrap();
        let mut config = Config::for_profile("WORKERTEST");
        config.worker.settings_path = file.path().to_path_buf();
        let stores = Stores::new(&StorageBackend::memory(), 4);
        assert!(Runtime::new(config, stores, Arc::new(NoCloud)).is_err());
    }

    #[tokio::test]
    async fn tick_loop_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let cancel = shutdown.clone();
        let handle = tokio::spawn(tick_loop("test", Duration::from_millis(10), shutdown, move || {
            let counter = counter.clone();
            let cancel = cancel.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                    cancel.cancel();
                }
            }
        }));
        handle.await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn trigger_period_follows_trigger_window() {
        let (rt, _file) = runtime(SETTINGS);
        assert_eq!(rt.trigger_period, Duration::from_secs(15 * 60));

        let (rt, _file) = runtime_with(SETTINGS, Some(60));
        assert_eq!(rt.trigger_period, Duration::from_secs(60));

        let (rt, _file) = runtime_with(SETTINGS, Some(3_600));
        assert_eq!(rt.trigger_period, Duration::from_secs(15 * 60));
    }

    #[tokio::test]
    async fn tick_longer_than_period_completes() {
        let shutdown = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f, cancel) = (started.clone(), finished.clone(), shutdown.clone());
        let handle = tokio::spawn(tick_loop("slow", Duration::from_millis(10), shutdown, move || {
            let (s, f, cancel) = (s.clone(), f.clone(), cancel.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(35)).await;
                f.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
            }
        }));
        handle.await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
