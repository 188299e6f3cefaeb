//! Trigger side of the chaos pipeline.
//!
//! The [`Dispatcher`] turns due schedule entries and rollback-eligible
//! activities into executor invocations; an [`ExecutorInvoker`] starts them
//! without waiting for the actions to finish. [`expire`] drops rows that no
//! window reaches any more.

pub mod dispatcher;
pub mod error;
pub mod invoker;
pub mod retention;

pub use chaos_storage::InvocationSource;
pub use dispatcher::{rollback_payload, DispatchReport, Dispatcher, Invocation};
pub use error::DispatchError;
pub use invoker::{ExecutorInvoker, LocalInvoker};
pub use retention::{expire, Cutoffs, ExpiryReport};
