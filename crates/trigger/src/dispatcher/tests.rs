//! Tests for forward and rollback dispatch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone};
use uuid::Uuid;

use chaos_core::{PowerState, ResourceRecord, ScheduleBatch, ScheduleEntry};
use chaos_storage::{StorageBackend, Stores};

use super::*;

/// Records accepted invocations; refuses unknown endpoints and fails targets
/// listed in `failing`.
struct MockInvoker {
    known: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, TriggerPayload)>>,
    attempts: AtomicUsize,
}

impl MockInvoker {
    fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, target_id: &str) -> Self {
        self.failing.insert(target_id.to_string());
        self
    }

    fn calls(&self) -> Vec<(String, TriggerPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutorInvoker for MockInvoker {
    async fn invoke(&self, endpoint: &str, payload: String) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.known.contains(endpoint) {
            return Err(DispatchError::UnknownEndpoint(endpoint.to_string()));
        }
        let payload = TriggerPayload::parse(&payload).unwrap();
        if self.failing.contains(&payload.target_id) {
            return Err(DispatchError::ShuttingDown);
        }
        self.calls.lock().unwrap().push((endpoint.to_string(), payload));
        Ok(())
    }
}

const VM_EXECUTOR: &str = "virtualmachinesexecuter";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn context() -> ChaosContext {
    let mut settings = ChaosSettings::default();
    settings.enabled = true;
    settings.trigger_frequency = 15;
    settings.rollback_frequency = 60;
    ChaosContext::new(settings, Stores::new(&StorageBackend::memory(), 4))
}

fn vm(name: &str) -> ResourceRecord {
    ResourceRecord::new(
        ResourceGroupKind::VirtualMachines,
        ResourceKind::VirtualMachine,
        format!("/subscriptions/s/resourceGroups/rg-a/providers/Microsoft.Compute/virtualMachines/{name}"),
    )
    .with_power_state(PowerState::Running)
}

async fn schedule(ctx: &ChaosContext, endpoint: &str, at: DateTime<Utc>, names: &[&str]) {
    let batch = ScheduleBatch {
        group: ResourceGroupKind::VirtualMachines,
        executor_endpoint: endpoint.to_string(),
        session_id: Uuid::new_v4(),
        created_at: at - Duration::minutes(60),
        scheduled_execution_time: at,
    };
    let entries: Vec<ScheduleEntry> = names
        .iter()
        .map(|n| ScheduleEntry::new(&batch, &vm(n), ChaosAction::PowerOff, None).unwrap())
        .collect();
    ctx.stores
        .schedule
        .insert_batch(ResourceGroupKind::VirtualMachines, &entries)
        .await
        .unwrap();
}

fn completed_activity(name: &str, initial: PowerState, completed_at: DateTime<Utc>) -> EventActivity {
    let payload = TriggerPayload::for_record(&vm(name), ChaosAction::disrupting(initial));
    let mut activity = EventActivity::started(
        &payload,
        ResourceKind::VirtualMachine.resource_type(),
        initial,
        completed_at - Duration::seconds(30),
    );
    activity.complete(PowerState::Stopped, completed_at);
    activity
}

// -- forward -------------------------------------------------------------

#[tokio::test]
async fn forward_window_is_half_open() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, VM_EXECUTOR, now, &["at-start"]).await;
    schedule(&ctx, VM_EXECUTOR, now + Duration::minutes(14), &["inside"]).await;
    schedule(&ctx, VM_EXECUTOR, now + Duration::minutes(15), &["at-end"]).await;
    schedule(&ctx, VM_EXECUTOR, now - Duration::seconds(1), &["past"]).await;

    let dispatcher = Dispatcher::new(Arc::new(MockInvoker::new(&[VM_EXECUTOR])));
    let mut targets: Vec<String> = dispatcher
        .forward_entries(&ctx, now)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.target_id)
        .collect();
    targets.sort();

    assert_eq!(targets.len(), 2);
    assert!(targets[0].ends_with("at-start"));
    assert!(targets[1].ends_with("inside"));
}

#[tokio::test]
async fn tick_dispatches_due_entries() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, VM_EXECUTOR, now + Duration::minutes(5), &["vm-1", "vm-2", "vm-3"]).await;
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));

    let report = Dispatcher::new(invoker.clone()).tick(&ctx, now).await.unwrap();

    assert_eq!(report.forward, 3);
    assert_eq!(report.dispatched(), 3);
    let calls = invoker.calls();
    assert!(calls.iter().all(|(endpoint, p)| endpoint == VM_EXECUTOR && p.action == ChaosAction::PowerOff && !p.rollback));
}

#[tokio::test]
async fn unknown_endpoint_is_skipped() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, "retiredexecuter", now, &["vm-1"]).await;
    schedule(&ctx, VM_EXECUTOR, now, &["vm-2"]).await;
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));

    let report = Dispatcher::new(invoker.clone()).tick(&ctx, now).await.unwrap();

    assert_eq!(report.forward, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(invoker.calls()[0].1.target_id.ends_with("vm-2"));
}

#[tokio::test]
async fn failed_invocation_does_not_block_others() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, VM_EXECUTOR, now, &["vm-1", "vm-2", "vm-3"]).await;
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]).failing_on(&vm("vm-2").id));

    let report = Dispatcher::new(invoker.clone()).tick(&ctx, now).await.unwrap();

    assert_eq!(invoker.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.forward, 2);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn entry_dispatched_once_across_minute_ticks() {
    let ctx = context();
    let start = t0();
    schedule(&ctx, VM_EXECUTOR, start + Duration::minutes(10), &["vm-1"]).await;
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));
    let dispatcher = Dispatcher::new(invoker.clone());

    let mut forward = 0;
    for minute in 0..15 {
        forward += dispatcher.tick(&ctx, start + Duration::minutes(minute)).await.unwrap().forward;
    }

    assert_eq!(forward, 1);
    assert_eq!(invoker.calls().len(), 1);
    assert!(dispatcher.forward_entries(&ctx, start).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_endpoint_is_not_retried() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, "retiredexecuter", now + Duration::minutes(5), &["vm-1"]).await;
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));
    let dispatcher = Dispatcher::new(invoker.clone());

    assert_eq!(dispatcher.tick(&ctx, now).await.unwrap().skipped, 1);
    assert_eq!(dispatcher.tick(&ctx, now + Duration::minutes(1)).await.unwrap(), DispatchReport::default());
    assert_eq!(invoker.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_invocation_is_retried_next_tick() {
    let ctx = context();
    let now = t0();
    schedule(&ctx, VM_EXECUTOR, now + Duration::minutes(5), &["vm-1"]).await;
    let failing = Dispatcher::new(Arc::new(MockInvoker::new(&[VM_EXECUTOR]).failing_on(&vm("vm-1").id)));

    assert_eq!(failing.tick(&ctx, now).await.unwrap().failed, 1);

    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));
    let report = Dispatcher::new(invoker.clone())
        .tick(&ctx, now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.forward, 1);
    assert_eq!(invoker.calls().len(), 1);
}

#[tokio::test]
async fn empty_tick() {
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));
    let report = Dispatcher::new(invoker.clone()).tick(&context(), t0()).await.unwrap();
    assert_eq!(report, DispatchReport::default());
    assert_eq!(invoker.attempts.load(Ordering::SeqCst), 0);
}

// -- rollback ------------------------------------------------------------

#[tokio::test]
async fn rollback_picked_up_between_sixty_and_seventy_five_minutes() {
    let ctx = context();
    let completed = t0();
    ctx.stores
        .activity
        .upsert(&completed_activity("vm-1", PowerState::Running, completed))
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(MockInvoker::new(&[VM_EXECUTOR])));

    let cases = [
        (Duration::minutes(59), 0),
        (Duration::minutes(60), 1),
        (Duration::minutes(74) + Duration::seconds(59), 1),
        (Duration::minutes(75), 0),
    ];
    for (offset, expected) in cases {
        let found = dispatcher.rollback_entries(&ctx, completed + offset).await.unwrap();
        assert_eq!(found.len(), expected, "at T+{}s", offset.num_seconds());
    }

    let found = dispatcher.rollback_entries(&ctx, completed + Duration::minutes(60)).await.unwrap();
    let payload = TriggerPayload::parse(&found[0].payload).unwrap();
    assert_eq!(found[0].endpoint, VM_EXECUTOR);
    assert_eq!(payload.action, ChaosAction::Start);
    assert!(payload.rollback);
    assert_eq!(payload.resource_group, "rg-a");
    assert_eq!(payload.target_id, vm("vm-1").id);
}

#[tokio::test]
async fn activity_rolled_back_once_across_minute_ticks() {
    let ctx = context();
    let completed = t0();
    let activity = completed_activity("vm-1", PowerState::Running, completed);
    ctx.stores.activity.upsert(&activity).await.unwrap();
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));
    let dispatcher = Dispatcher::new(invoker.clone());

    let mut rollback = 0;
    for minute in 60..75 {
        rollback += dispatcher
            .tick(&ctx, completed + Duration::minutes(minute))
            .await
            .unwrap()
            .rollback;
    }

    assert_eq!(rollback, 1);
    assert_eq!(invoker.calls().len(), 1);
    assert!(ctx
        .stores
        .dispatch
        .is_claimed(InvocationSource::Rollback, &activity.id.to_string())
        .await
        .unwrap());
}

#[tokio::test]
async fn rollbacks_and_failures_are_not_rolled_back() {
    let ctx = context();
    let completed = t0();
    let mut rolled = completed_activity("vm-1", PowerState::Running, completed);
    rolled.rollback = true;
    let mut failed = completed_activity("vm-2", PowerState::Running, completed);
    failed.fail("boom", completed);
    let unknown = completed_activity("vm-3", PowerState::Unknown, completed);
    let normal = completed_activity("vm-4", PowerState::Stopped, completed);
    for a in [&rolled, &failed, &unknown, &normal] {
        ctx.stores.activity.upsert(a).await.unwrap();
    }
    let invoker = Arc::new(MockInvoker::new(&[VM_EXECUTOR]));

    let report = Dispatcher::new(invoker.clone())
        .tick(&ctx, completed + Duration::minutes(65))
        .await
        .unwrap();

    assert_eq!(report.rollback, 1);
    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.target_id.ends_with("vm-4"));
    assert_eq!(calls[0].1.action, ChaosAction::PowerOff);
}

#[test]
fn rollback_payload_inverts_initial_state() {
    let activity = completed_activity("vm-1", PowerState::Deallocated, t0());
    let payload = rollback_payload(&activity).unwrap();
    assert_eq!(payload.action, ChaosAction::PowerOff);
    assert_eq!(payload.resource_name, "vm-1");
    assert_eq!(payload.group, Some(ResourceGroupKind::VirtualMachines));

    let unknown = completed_activity("vm-1", PowerState::Unknown, t0());
    assert!(rollback_payload(&unknown).is_none());
}

#[test]
fn rollback_endpoint_falls_back_to_resource_type() {
    let settings = ChaosSettings::default();
    let mut activity = completed_activity("vm-1", PowerState::Running, t0());
    activity.group = None;
    assert_eq!(rollback_endpoint(&settings, &activity), Some(VM_EXECUTOR));

    activity.resource_type = ResourceKind::ScaleSetVm.resource_type().to_string();
    assert_eq!(rollback_endpoint(&settings, &activity), Some("virtualmachinescalesetexecuter"));
}
