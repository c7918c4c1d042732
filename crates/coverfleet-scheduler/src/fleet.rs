//! What the scheduler needs from the pool and the monitor.

use std::future::Future;

use coverfleet_core::{ConfigId, SlotId};
use coverfleet_coverage::CoverageMonitor;
use coverfleet_pool::ResourcePool;

/// The physical fleet the scheduler mutates.
pub trait Fleet {
    /// Every slot id, ascending.
    fn slot_ids(&self) -> Vec<SlotId>;

    /// Ids of slots with a running worker, ascending.
    fn active_slots(&self) -> Vec<SlotId>;

    fn current_config(&self, slot: SlotId) -> Option<ConfigId>;

    fn weight(&self, slot: SlotId) -> f64;

    /// Restart `slot` on `config`. Returns whether a worker is running
    /// afterwards; failures are contained by the implementation.
    fn switch_configuration(
        &mut self,
        slot: SlotId,
        config: ConfigId,
    ) -> impl Future<Output = bool> + Send;
}

/// Read access to observed coverage.
pub trait CoverageView {
    fn coverage_of(&self, slot: SlotId) -> impl Future<Output = u64> + Send;

    fn merged_coverage(&self, slots: &[SlotId]) -> impl Future<Output = u64> + Send;
}

impl Fleet for ResourcePool {
    fn slot_ids(&self) -> Vec<SlotId> {
        ResourcePool::slot_ids(self)
    }

    fn active_slots(&self) -> Vec<SlotId> {
        ResourcePool::active_slots(self)
    }

    fn current_config(&self, slot: SlotId) -> Option<ConfigId> {
        self.slot(slot).and_then(|s| s.config().cloned())
    }

    fn weight(&self, slot: SlotId) -> f64 {
        self.slot(slot).map(|s| s.weight()).unwrap_or(1.0)
    }

    fn switch_configuration(
        &mut self,
        slot: SlotId,
        config: ConfigId,
    ) -> impl Future<Output = bool> + Send {
        ResourcePool::switch_configuration(self, slot, config)
    }
}

impl CoverageView for CoverageMonitor {
    fn coverage_of(&self, slot: SlotId) -> impl Future<Output = u64> + Send {
        CoverageMonitor::coverage_of(self, slot)
    }

    fn merged_coverage(&self, slots: &[SlotId]) -> impl Future<Output = u64> + Send {
        CoverageMonitor::merged_coverage(self, slots)
    }
}
