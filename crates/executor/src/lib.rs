//! Executes one chaos action against one resource and records the outcome.
//!
//! - [`ResourceControl`]: the cloud boundary (power state, start, power off,
//!   restart, resource-group listing)
//! - [`ArmClient`]: the Azure Resource Manager implementation over `reqwest`
//! - [`Executor`]: payload validation, precondition table, activity log
//! - [`ExecutorRegistry`]: named executor endpoints

pub mod arm;
pub mod control;
pub mod error;
pub mod executor;
pub mod registry;

pub use arm::ArmClient;
pub use control::{ResourceControl, ResourceStatus};
pub use error::{ControlError, ExecutorError};
pub use executor::{ExecutionOutcome, Executor};
pub use registry::ExecutorRegistry;
