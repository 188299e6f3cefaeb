use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChaosError, KeyError};
use crate::key;

/// Chaos group a resource is scheduled under. Each group has its own rule
/// engine and executor endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceGroupKind {
    VirtualMachines,
    AvailabilitySets,
    ScaleSets,
    AvailabilityZones,
}

impl ResourceGroupKind {
    pub const ALL: [ResourceGroupKind; 4] = [
        ResourceGroupKind::VirtualMachines,
        ResourceGroupKind::AvailabilitySets,
        ResourceGroupKind::ScaleSets,
        ResourceGroupKind::AvailabilityZones,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceGroupKind::VirtualMachines => "VirtualMachines",
            ResourceGroupKind::AvailabilitySets => "AvailabilitySets",
            ResourceGroupKind::ScaleSets => "ScaleSets",
            ResourceGroupKind::AvailabilityZones => "AvailabilityZones",
        }
    }
}

impl fmt::Display for ResourceGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceGroupKind {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChaosError::Configuration(format!("unknown resource group kind '{s}'")))
    }
}

/// Power state as reported by the resource-control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Unknown,
}

impl PowerState {
    /// Parse an instance-view status code such as `PowerState/running`.
    pub fn from_status_code(code: &str) -> Option<Self> {
        let state = code.strip_prefix("PowerState/")?;
        Some(Self::from_name(state))
    }

    /// Lenient name parse; unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "starting" => PowerState::Starting,
            "running" => PowerState::Running,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocating" => PowerState::Deallocating,
            "deallocated" => PowerState::Deallocated,
            _ => PowerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Starting => "Starting",
            PowerState::Running => "Running",
            PowerState::Stopping => "Stopping",
            PowerState::Stopped => "Stopped",
            PowerState::Deallocating => "Deallocating",
            PowerState::Deallocated => "Deallocated",
            PowerState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of cloud object an inventory record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachine,
    AvailabilitySet,
    ScaleSet,
    ScaleSetVm,
}

impl ResourceKind {
    pub fn resource_type(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
            ResourceKind::AvailabilitySet => "Microsoft.Compute/availabilitySets",
            ResourceKind::ScaleSet => "Microsoft.Compute/virtualMachineScaleSets",
            ResourceKind::ScaleSetVm => "Microsoft.Compute/virtualMachineScaleSets/virtualMachines",
        }
    }
}

/// One crawled resource. Written by the crawler, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    pub group: ResourceGroupKind,
    pub kind: ResourceKind,
    pub name: String,
    pub resource_group_name: String,
    pub region_name: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub availability_set_id: Option<String>,
    #[serde(default)]
    pub fault_domain: Option<u32>,
    #[serde(default)]
    pub update_domain: Option<u32>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub scale_set_id: Option<String>,
    #[serde(default)]
    pub has_children: bool,
    pub last_seen_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Build a record from its resource id. The name and resource group are
    /// taken from the id path.
    pub fn new(group: ResourceGroupKind, kind: ResourceKind, id: impl Into<String>) -> Self {
        let id = id.into();
        let name = id.rsplit('/').find(|s| !s.is_empty()).unwrap_or_default().to_string();
        let resource_group_name = resource_group_of(&id).unwrap_or_default().to_string();
        Self {
            id,
            group,
            kind,
            name,
            resource_group_name,
            region_name: String::new(),
            power_state: PowerState::Unknown,
            availability_set_id: None,
            fault_domain: None,
            update_domain: None,
            availability_zone: None,
            scale_set_id: None,
            has_children: false,
            last_seen_at: Utc::now(),
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region_name = region.into();
        self
    }

    pub fn with_power_state(mut self, state: PowerState) -> Self {
        self.power_state = state;
        self
    }

    pub fn in_availability_set(mut self, set_id: impl Into<String>, fault_domain: u32, update_domain: u32) -> Self {
        self.availability_set_id = Some(set_id.into());
        self.fault_domain = Some(fault_domain);
        self.update_domain = Some(update_domain);
        self
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }

    pub fn in_scale_set(mut self, scale_set_id: impl Into<String>) -> Self {
        self.scale_set_id = Some(scale_set_id.into());
        self
    }

    pub fn with_children(mut self, has_children: bool) -> Self {
        self.has_children = has_children;
        self
    }

    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen_at = at;
        self
    }

    /// Row key in the inventory table.
    pub fn key(&self) -> Result<String, KeyError> {
        key::encode(&self.id)
    }

    /// Partition key in the inventory table.
    pub fn group_key(&self) -> &'static str {
        self.group.as_str()
    }

    pub fn resource_type(&self) -> &'static str {
        self.kind.resource_type()
    }
}

/// Resource group segment of an ARM id (`/subscriptions/../resourceGroups/<rg>/..`).
pub fn resource_group_of(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next().filter(|s| !s.is_empty());
        }
    }
    None
}
