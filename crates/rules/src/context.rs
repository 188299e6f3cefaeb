use std::sync::Arc;

use chrono::{DateTime, Utc};

use chaos_core::{ChaosSettings, TimeWindow};
use chaos_storage::Stores;

use crate::inventory::InventoryReader;

/// Everything a rule engine needs for one tick. Built by the caller and
/// passed down; cheap to clone.
#[derive(Clone)]
pub struct ChaosContext {
    pub settings: Arc<ChaosSettings>,
    pub stores: Stores,
}

impl ChaosContext {
    pub fn new(settings: ChaosSettings, stores: Stores) -> Self {
        Self {
            settings: Arc::new(settings),
            stores,
        }
    }

    pub fn inventory(&self) -> InventoryReader {
        InventoryReader::new(self.stores.inventory.clone(), self.settings.resource_group_filter())
    }

    /// `[now - schedulerFrequency, now]`: entries and activities inside it
    /// count as recent.
    pub fn recent_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::closed(now - self.settings.scheduler_window(), now)
    }
}
