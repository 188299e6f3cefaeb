//! The resource-control trait the executor and the `check` command use.

use async_trait::async_trait;

use chaos_core::{PowerState, ResourceGroupFilter};

use crate::error::ControlError;

/// What the control plane reports about a resource right now.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
    pub id: String,
    pub name: String,
    /// ARM resource type, e.g. `Microsoft.Compute/virtualMachines`.
    pub resource_type: String,
    pub power_state: PowerState,
}

#[async_trait]
pub trait ResourceControl: Send + Sync {
    /// Current status of the resource with the full ARM id `id`.
    ///
    /// Returns [`ControlError::NotFound`] when the resource does not exist.
    async fn get_by_resource_id(&self, id: &str) -> Result<ResourceStatus, ControlError>;

    async fn start(&self, id: &str) -> Result<(), ControlError>;

    async fn power_off(&self, id: &str) -> Result<(), ControlError>;

    async fn restart(&self, id: &str) -> Result<(), ControlError>;

    /// Compute has no separate graceful stop; it is a power off.
    async fn stop(&self, id: &str) -> Result<(), ControlError> {
        self.power_off(id).await
    }

    /// Resource-group names of the subscription that pass `filter`.
    async fn list_resource_groups(&self, filter: &ResourceGroupFilter) -> Result<Vec<String>, ControlError>;
}
