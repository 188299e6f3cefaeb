pub mod activity;
pub mod backend;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod schedule;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use activity::ActivityStore;
pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use dispatch::{DispatchClaim, DispatchLedger, InvocationSource};
pub use error::StorageError;
pub use inventory::InventoryStore;
pub use schedule::ScheduleStore;
pub use table::TableStore;

/// The tables the pipeline works with, sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub inventory: InventoryStore,
    pub schedule: ScheduleStore,
    pub activity: ActivityStore,
    pub dispatch: DispatchLedger,
}

impl Stores {
    pub fn new(backend: &StorageBackend, max_concurrency: usize) -> Self {
        Self {
            inventory: InventoryStore::new(backend),
            schedule: ScheduleStore::new(backend, max_concurrency),
            activity: ActivityStore::new(backend),
            dispatch: DispatchLedger::new(backend),
        }
    }
}
