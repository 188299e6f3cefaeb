//! Named executor endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use chaos_core::ChaosSettings;
use chaos_storage::ActivityStore;

use crate::control::ResourceControl;
use crate::error::ExecutorError;
use crate::executor::{ExecutionOutcome, Executor};

/// Endpoint name → executor. Names compare case-insensitively.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One executor per distinct endpoint named in the settings table, all
    /// sharing `control` and `activities`.
    pub fn for_settings(settings: &ChaosSettings, control: Arc<dyn ResourceControl>, activities: &ActivityStore) -> Self {
        let mut registry = Self::new();
        for endpoint in settings.executor_endpoints.values() {
            if registry.get(endpoint).is_none() {
                registry.register(Executor::new(endpoint.clone(), control.clone(), activities.clone()));
            }
        }
        registry
    }

    /// Register `executor` under its name, replacing any previous one.
    pub fn register(&mut self, executor: Executor) {
        self.executors.insert(executor.name().to_ascii_lowercase(), Arc::new(executor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Executor>> {
        self.executors.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Run `raw` on the executor registered as `endpoint`.
    pub async fn invoke(&self, endpoint: &str, raw: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let executor = self
            .get(endpoint)
            .ok_or_else(|| ExecutorError::UnknownEndpoint(endpoint.to_string()))?;
        executor.execute(raw).await
    }
}
