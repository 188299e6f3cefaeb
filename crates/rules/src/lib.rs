//! Target selection for the chaos pipeline.
//!
//! This crate provides:
//! - Pure selection policies (percentage batches, uniform pick, domain and
//!   zone combinations)
//! - An inventory reader that applies the resource-group filter
//! - Anti-repeat sets derived from the schedule and activity stores
//! - One rule engine per chaos group
//! - The chaos scheduler that picks one eligible group per tick

pub mod anti_repeat;
pub mod context;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod scheduler;
pub mod selection;

pub use context::ChaosContext;
pub use engine::{
    default_engines, AvailabilitySetRuleEngine, AvailabilityZoneRuleEngine, RuleEngine, RuleRunReport,
    ScaleSetRuleEngine, VirtualMachineRuleEngine,
};
pub use error::{RuleError, SelectionError};
pub use inventory::InventoryReader;
pub use scheduler::ChaosScheduler;
