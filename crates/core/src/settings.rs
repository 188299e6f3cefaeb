//! The chaos settings document.
//!
//! Authored outside this system (configuration UI) and read-only here. The
//! document uses dotted property names; missing properties fall back to
//! defaults and `null` is treated the same as a missing value.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ChaosError;
use crate::key::DomainAxis;
use crate::resource::ResourceGroupKind;

pub const VIRTUAL_MACHINE_EXECUTOR: &str = "virtualmachinesexecuter";
pub const SCALE_SET_EXECUTOR: &str = "virtualmachinescalesetexecuter";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_scheduler_frequency() -> u32 {
    60
}

fn default_trigger_frequency() -> u32 {
    15
}

fn default_rollback_frequency() -> u32 {
    60
}

fn default_endpoints() -> BTreeMap<String, String> {
    ResourceGroupKind::ALL
        .into_iter()
        .map(|g| {
            let endpoint = match g {
                ResourceGroupKind::ScaleSets => SCALE_SET_EXECUTOR,
                _ => VIRTUAL_MACHINE_EXECUTOR,
            };
            (g.as_str().to_string(), endpoint.to_string())
        })
        .collect()
}

// ── Per-group blocks ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineSettings {
    #[serde(rename = "microsoft.chaos.VM.enabled", default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(rename = "microsoft.chaos.VM.percentageTermination", default)]
    pub percentage_termination: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleSetSettings {
    #[serde(rename = "microsoft.chaos.VmSS.enabled", default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(rename = "microsoft.chaos.VmSS.percentageTermination", default)]
    pub percentage_termination: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySetSettings {
    #[serde(rename = "microsoft.chaos.AvSets.enabled", default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(
        rename = "microsoft.chaos.AvSets.faultDomain.enabled",
        default,
        deserialize_with = "null_as_default"
    )]
    pub fault_domain_enabled: bool,
    #[serde(
        rename = "microsoft.chaos.AvSets.updateDomain.enabled",
        default,
        deserialize_with = "null_as_default"
    )]
    pub update_domain_enabled: bool,
}

impl AvailabilitySetSettings {
    /// The selected axis, when exactly one is enabled.
    pub fn domain_axis(&self) -> Option<DomainAxis> {
        match (self.fault_domain_enabled, self.update_domain_enabled) {
            (true, false) => Some(DomainAxis::Fault),
            (false, true) => Some(DomainAxis::Update),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityZoneSettings {
    #[serde(rename = "microsoft.chaos.AZ.enabled", default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(rename = "microsoft.chaos.AZ.regions", default, deserialize_with = "null_as_default")]
    pub regions: Vec<String>,
}

// ── Document ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosSettings {
    #[serde(rename = "microsoft.chaos.enabled", default, deserialize_with = "null_as_default")]
    pub enabled: bool,

    /// Minutes between rule-engine runs, also the anti-repeat window.
    #[serde(rename = "microsoft.chaos.scheduler.frequency", default = "default_scheduler_frequency")]
    pub scheduler_frequency: u32,

    /// Minutes of dispatcher lookahead.
    #[serde(rename = "microsoft.chaos.trigger.frequency", default = "default_trigger_frequency")]
    pub trigger_frequency: u32,

    /// Minutes after completion before an action is rolled back.
    #[serde(
        rename = "microsoft.chaos.rollback.fequency",
        alias = "microsoft.chaos.rollback.frequency",
        default = "default_rollback_frequency"
    )]
    pub rollback_frequency: u32,

    /// Minutes between crawler runs. Inventory records older than this are
    /// treated as gone.
    #[serde(rename = "microsoft.chaos.crawler.frequency", default)]
    pub crawler_frequency: Option<u32>,

    #[serde(
        rename = "microsoft.chaos.blackListedResourceGroups",
        default,
        deserialize_with = "null_as_default"
    )]
    pub black_listed_resource_groups: Vec<String>,

    #[serde(
        rename = "microsoft.chaos.inclusiveOnlyResourceGroups",
        default,
        deserialize_with = "null_as_default"
    )]
    pub inclusive_only_resource_groups: Vec<String>,

    #[serde(rename = "microsoft.chaos.VM", default, deserialize_with = "null_as_default")]
    pub virtual_machines: VirtualMachineSettings,

    #[serde(rename = "microsoft.chaos.SS", default, deserialize_with = "null_as_default")]
    pub scale_sets: ScaleSetSettings,

    #[serde(rename = "microsoft.chaos.AS", default, deserialize_with = "null_as_default")]
    pub availability_sets: AvailabilitySetSettings,

    #[serde(rename = "microsoft.chaos.AZ", default, deserialize_with = "null_as_default")]
    pub availability_zones: AvailabilityZoneSettings,

    /// Group name → executor endpoint.
    #[serde(rename = "microsoft.chaos.executorEndpoints", default = "default_endpoints")]
    pub executor_endpoints: BTreeMap<String, String>,
}

impl Default for ChaosSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scheduler_frequency: default_scheduler_frequency(),
            trigger_frequency: default_trigger_frequency(),
            rollback_frequency: default_rollback_frequency(),
            crawler_frequency: None,
            black_listed_resource_groups: Vec::new(),
            inclusive_only_resource_groups: Vec::new(),
            virtual_machines: VirtualMachineSettings::default(),
            scale_sets: ScaleSetSettings::default(),
            availability_sets: AvailabilitySetSettings::default(),
            availability_zones: AvailabilityZoneSettings::default(),
            executor_endpoints: default_endpoints(),
        }
    }
}

impl ChaosSettings {
    /// Parse the settings blob. Accepts the bare chaos block or a document
    /// that nests it under `ChaosConfig`.
    pub fn from_json(raw: &str) -> Result<Self, ChaosError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ChaosError::Configuration(format!("settings are not valid JSON: {e}")))?;
        let block = value.get("ChaosConfig").cloned().unwrap_or(value);
        let settings: ChaosSettings = serde_json::from_value(block)
            .map_err(|e| ChaosError::Configuration(format!("settings: {e}")))?;
        Ok(settings)
    }

    /// Read, parse and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, ChaosError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChaosError::Configuration(format!("cannot read settings {}: {e}", path.display()))
        })?;
        let settings = Self::from_json(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ChaosError> {
        let invalid = |msg: String| -> Result<(), ChaosError> { Err(ChaosError::Configuration(msg)) };

        for (name, minutes) in [
            ("scheduler.frequency", self.scheduler_frequency),
            ("trigger.frequency", self.trigger_frequency),
            ("rollback.frequency", self.rollback_frequency),
        ] {
            if minutes == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }

        for (group, pct) in [
            ("VM", self.virtual_machines.percentage_termination),
            ("VmSS", self.scale_sets.percentage_termination),
        ] {
            if let Some(p) = pct {
                if !(0.0..=100.0).contains(&p) {
                    return invalid(format!("{group}.percentageTermination {p} outside [0, 100]"));
                }
            }
        }

        let av = &self.availability_sets;
        if av.fault_domain_enabled && av.update_domain_enabled {
            return invalid("fault domain and update domain chaos are mutually exclusive".into());
        }
        if av.enabled && av.domain_axis().is_none() {
            return invalid("availability set chaos needs fault or update domain enabled".into());
        }

        if self.availability_zones.enabled && self.availability_zones.regions.is_empty() {
            return invalid("availability zone chaos enabled without regions".into());
        }

        for (group, endpoint) in &self.executor_endpoints {
            if endpoint.trim().is_empty() {
                return invalid(format!("executor endpoint for {group} is empty"));
            }
        }

        Ok(())
    }

    /// Groups with chaos switched on. Empty when chaos is globally disabled.
    pub fn enabled_groups(&self) -> Vec<ResourceGroupKind> {
        if !self.enabled {
            return Vec::new();
        }
        ResourceGroupKind::ALL
            .into_iter()
            .filter(|g| self.group_enabled(*g))
            .collect()
    }

    pub fn group_enabled(&self, group: ResourceGroupKind) -> bool {
        match group {
            ResourceGroupKind::VirtualMachines => self.virtual_machines.enabled,
            ResourceGroupKind::ScaleSets => self.scale_sets.enabled,
            ResourceGroupKind::AvailabilitySets => self.availability_sets.enabled,
            ResourceGroupKind::AvailabilityZones => self.availability_zones.enabled,
        }
    }

    pub fn endpoint_for(&self, group: ResourceGroupKind) -> Option<&str> {
        self.executor_endpoints
            .get(group.as_str())
            .map(String::as_str)
            .filter(|e| !e.is_empty())
    }

    pub fn percentage_for(&self, group: ResourceGroupKind) -> Option<f64> {
        match group {
            ResourceGroupKind::VirtualMachines => self.virtual_machines.percentage_termination,
            ResourceGroupKind::ScaleSets => self.scale_sets.percentage_termination,
            _ => None,
        }
    }

    pub fn resource_group_filter(&self) -> ResourceGroupFilter {
        ResourceGroupFilter::from_lists(
            &self.inclusive_only_resource_groups,
            &self.black_listed_resource_groups,
        )
    }

    pub fn scheduler_window(&self) -> Duration {
        Duration::minutes(i64::from(self.scheduler_frequency))
    }

    pub fn trigger_window(&self) -> Duration {
        Duration::minutes(i64::from(self.trigger_frequency))
    }

    pub fn rollback_delay(&self) -> Duration {
        Duration::minutes(i64::from(self.rollback_frequency))
    }

    /// Oldest `lastSeenAt` an eligible inventory record may have.
    pub fn inventory_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.crawler_frequency
            .filter(|m| *m > 0)
            .map(|m| now - Duration::minutes(i64::from(m)))
    }
}

// ── Resource-group filter ─────────────────────────────────────

/// Which resource groups chaos may touch. An inclusive-only list takes
/// priority over the black list; names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResourceGroupFilter {
    #[default]
    All,
    InclusiveOnly(Vec<String>),
    Exclude(Vec<String>),
}

impl ResourceGroupFilter {
    pub fn from_lists(inclusive_only: &[String], black_listed: &[String]) -> Self {
        let clean = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        let inclusive = clean(inclusive_only);
        if !inclusive.is_empty() {
            return ResourceGroupFilter::InclusiveOnly(inclusive);
        }
        let black = clean(black_listed);
        if !black.is_empty() {
            return ResourceGroupFilter::Exclude(black);
        }
        ResourceGroupFilter::All
    }

    pub fn allows(&self, resource_group: &str) -> bool {
        let name = resource_group.trim().to_ascii_lowercase();
        match self {
            ResourceGroupFilter::All => true,
            ResourceGroupFilter::InclusiveOnly(list) => list.contains(&name),
            ResourceGroupFilter::Exclude(list) => !list.contains(&name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "microsoft.chaos.enabled": true,
        "microsoft.chaos.scheduler.frequency": 30,
        "microsoft.chaos.rollback.fequency": 45,
        "microsoft.chaos.trigger.frequency": 10,
        "microsoft.chaos.blackListedResourceGroups": ["rg-prod"],
        "microsoft.chaos.inclusiveOnlyResourceGroups": null,
        "microsoft.chaos.VM": {
            "microsoft.chaos.VM.enabled": true,
            "microsoft.chaos.VM.percentageTermination": 30
        },
        "microsoft.chaos.SS": {
            "microsoft.chaos.VmSS.enabled": true,
            "microsoft.chaos.VmSS.percentageTermination": null
        },
        "microsoft.chaos.AS": {
            "microsoft.chaos.AvSets.enabled": false,
            "microsoft.chaos.AvSets.faultDomain.enabled": true,
            "microsoft.chaos.AvSets.updateDomain.enabled": false
        },
        "microsoft.chaos.AZ": null
    }"#;

    // ── parsing ─────────────────────────────────────────────────

    #[test]
    fn parses_dotted_document() {
        let s = ChaosSettings::from_json(DOC).unwrap();
        assert!(s.enabled);
        assert_eq!(s.scheduler_frequency, 30);
        assert_eq!(s.rollback_frequency, 45);
        assert_eq!(s.trigger_frequency, 10);
        assert_eq!(s.virtual_machines.percentage_termination, Some(30.0));
        assert_eq!(s.scale_sets.percentage_termination, None);
        assert!(!s.availability_zones.enabled);
        assert!(s.inclusive_only_resource_groups.is_empty());
        s.validate().unwrap();
    }

    #[test]
    fn accepts_wrapped_document() {
        let wrapped = format!(r#"{{ "ChaosConfig": {DOC} }}"#);
        assert_eq!(ChaosSettings::from_json(&wrapped).unwrap(), ChaosSettings::from_json(DOC).unwrap());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let s = ChaosSettings::from_json("{}").unwrap();
        assert!(!s.enabled);
        assert_eq!(s.scheduler_frequency, 60);
        assert_eq!(s.trigger_frequency, 15);
        assert_eq!(s.rollback_frequency, 60);
        assert_eq!(s.endpoint_for(ResourceGroupKind::ScaleSets), Some(SCALE_SET_EXECUTOR));
        assert_eq!(s.endpoint_for(ResourceGroupKind::AvailabilityZones), Some(VIRTUAL_MACHINE_EXECUTOR));
        s.validate().unwrap();
    }

    #[test]
    fn invalid_json_is_configuration_error() {
        assert!(ChaosSettings::from_json("{").unwrap_err().is_configuration());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, DOC).unwrap();
        assert!(ChaosSettings::load(&path).unwrap().enabled);
        assert!(ChaosSettings::load(&dir.path().join("missing.json")).is_err());
    }

    // ── validation ──────────────────────────────────────────────

    #[test]
    fn both_domain_axes_is_rejected() {
        let mut s = ChaosSettings::default();
        s.availability_sets.fault_domain_enabled = true;
        s.availability_sets.update_domain_enabled = true;
        assert!(s.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn enabled_sets_need_an_axis() {
        let mut s = ChaosSettings::default();
        s.availability_sets.enabled = true;
        assert!(s.validate().is_err());
        s.availability_sets.update_domain_enabled = true;
        s.validate().unwrap();
        assert_eq!(s.availability_sets.domain_axis(), Some(DomainAxis::Update));
    }

    #[test]
    fn rejects_bad_numbers_and_endpoints() {
        let mut s = ChaosSettings::default();
        s.trigger_frequency = 0;
        assert!(s.validate().is_err());

        let mut s = ChaosSettings::default();
        s.virtual_machines.percentage_termination = Some(120.0);
        assert!(s.validate().is_err());

        let mut s = ChaosSettings::default();
        s.availability_zones.enabled = true;
        assert!(s.validate().is_err());

        let mut s = ChaosSettings::default();
        s.executor_endpoints.insert("ScaleSets".into(), " ".into());
        assert!(s.validate().is_err());
    }

    // ── groups ──────────────────────────────────────────────────

    #[test]
    fn enabled_groups_respect_global_switch() {
        let mut s = ChaosSettings::from_json(DOC).unwrap();
        assert_eq!(
            s.enabled_groups(),
            vec![ResourceGroupKind::VirtualMachines, ResourceGroupKind::ScaleSets]
        );
        s.enabled = false;
        assert!(s.enabled_groups().is_empty());
    }

    #[test]
    fn windows_are_minutes() {
        let s = ChaosSettings::from_json(DOC).unwrap();
        assert_eq!(s.scheduler_window(), Duration::minutes(30));
        assert_eq!(s.rollback_delay(), Duration::minutes(45));
        let now = Utc::now();
        assert_eq!(s.inventory_since(now), None);

        let s = ChaosSettings::from_json(r#"{"microsoft.chaos.crawler.frequency": 20}"#).unwrap();
        assert_eq!(s.inventory_since(now), Some(now - Duration::minutes(20)));
    }

    // ── filter ──────────────────────────────────────────────────

    #[test]
    fn inclusive_list_wins_over_black_list() {
        let f = ResourceGroupFilter::from_lists(&["RG-Test".into()], &["rg-test".into()]);
        assert!(f.allows("rg-test"));
        assert!(!f.allows("rg-other"));
    }

    #[test]
    fn black_list_is_case_insensitive() {
        let s = ChaosSettings::from_json(DOC).unwrap();
        let f = s.resource_group_filter();
        assert!(!f.allows("RG-PROD"));
        assert!(f.allows("rg-dev"));
    }

    #[test]
    fn blank_lists_mean_no_filter() {
        let f = ResourceGroupFilter::from_lists(&[" ".into()], &[]);
        assert_eq!(f, ResourceGroupFilter::All);
        assert!(f.allows("anything"));
    }
}
