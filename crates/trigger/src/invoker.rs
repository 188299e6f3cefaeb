//! Starting executor invocations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use chaos_executor::ExecutorRegistry;

use crate::error::DispatchError;

/// Hands a serialized trigger payload to a named executor endpoint.
///
/// `invoke` returns once the invocation is accepted, not when the action
/// finishes.
#[async_trait]
pub trait ExecutorInvoker: Send + Sync {
    async fn invoke(&self, endpoint: &str, payload: String) -> Result<(), DispatchError>;
}

/// Runs executors in-process on tracked tasks, at most `max_concurrency` at a
/// time.
pub struct LocalInvoker {
    registry: Arc<ExecutorRegistry>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl LocalInvoker {
    pub fn new(registry: ExecutorRegistry, max_concurrency: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Invocations accepted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting invocations and wait for the running ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(in_flight = self.in_flight(), "waiting for executor invocations");
        self.tracker.wait().await;
    }
}

#[async_trait]
impl ExecutorInvoker for LocalInvoker {
    async fn invoke(&self, endpoint: &str, payload: String) -> Result<(), DispatchError> {
        if self.tracker.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }
        let executor = self
            .registry
            .get(endpoint)
            .ok_or_else(|| DispatchError::UnknownEndpoint(endpoint.to_string()))?;
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match executor.execute(&payload).await {
                Ok(outcome) => debug!(executor = %executor.name(), outcome = outcome.label(), "invocation finished"),
                Err(e) => error!(
                    executor = %executor.name(),
                    outcome = e.outcome().map(|o| o.label()),
                    error = %e,
                    "invocation failed"
                ),
            }
        });
        Ok(())
    }
}
