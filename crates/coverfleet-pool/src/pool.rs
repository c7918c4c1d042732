//! Resource pool: fixed worker slots, their regions, and their processes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use coverfleet_core::{weight_of, ConfigId, FaultKind, FaultSink, FleetSettings, RegionPair, SlotId};

use crate::region;
use crate::worker::{self, WorkerCommand};

/// Configuration for a resource pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of slots. Fixed for the pool's lifetime.
    pub count: u32,
    /// Id of the first slot; the rest follow consecutively.
    pub start_index: u32,
    /// Project name, used as the region name prefix.
    pub project: String,
    /// Directory holding the region files.
    pub shm_dir: PathBuf,
    /// Size in bytes of every region.
    pub region_size: u64,
    /// How workers are launched.
    pub worker: WorkerCommand,
    /// Maximum number of slots whose regions are allocated at once.
    pub creation_concurrency: usize,
    /// How long a stopping worker gets before it is abandoned.
    pub stop_grace: Duration,
}

impl PoolConfig {
    pub const DEFAULT_CREATION_CONCURRENCY: usize = 8;
    pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

    pub fn from_settings(settings: &FleetSettings) -> Self {
        Self {
            count: settings.num_instances,
            start_index: settings.start_idx,
            project: settings.project.clone(),
            shm_dir: settings.shm_dir.clone(),
            region_size: settings.region_size,
            worker: WorkerCommand::from(&settings.worker),
            creation_concurrency: Self::DEFAULT_CREATION_CONCURRENCY,
            stop_grace: Self::DEFAULT_STOP_GRACE,
        }
    }
}

/// One managed worker unit.
#[derive(Debug)]
pub struct WorkerSlot {
    id: SlotId,
    active: bool,
    process: Option<Child>,
    config: Option<ConfigId>,
    weight: f64,
    regions: RegionPair,
}

impl WorkerSlot {
    fn new(id: SlotId, regions: RegionPair) -> Self {
        Self {
            id,
            active: false,
            process: None,
            config: None,
            weight: 1.0,
            regions,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> Option<&ConfigId> {
        self.config.as_ref()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn regions(&self) -> &RegionPair {
        &self.regions
    }

    /// OS process id of the live worker, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }
}

/// Outcome of [`ResourcePool::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub workers_stopped: usize,
    pub regions_removed: usize,
    pub failures: usize,
}

/// Owns every worker slot and the regions bound to them.
pub struct ResourcePool {
    config: PoolConfig,
    slots: BTreeMap<SlotId, WorkerSlot>,
    /// Publishes the active-slot set to observers.
    active_tx: watch::Sender<BTreeSet<SlotId>>,
    faults: FaultSink,
}

impl ResourcePool {
    /// Allocate `config.count` slots and their backing regions.
    ///
    /// Region allocation runs on blocking threads, at most
    /// `creation_concurrency` slots at a time. Existing region files are
    /// reused untouched. A failed allocation is recorded as a fault; the
    /// slot stays usable and simply reads empty coverage.
    pub async fn initialize(config: PoolConfig, faults: FaultSink) -> Self {
        let end = config.start_index.saturating_add(config.count);
        let slots: BTreeMap<SlotId, WorkerSlot> = (config.start_index..end)
            .map(SlotId)
            .map(|id| {
                let regions = RegionPair::for_slot(&config.shm_dir, &config.project, id);
                (id, WorkerSlot::new(id, regions))
            })
            .collect();

        let bindings: Vec<(SlotId, RegionPair)> = slots
            .values()
            .map(|slot| (slot.id, slot.regions.clone()))
            .collect();
        allocate_regions(
            bindings,
            config.region_size,
            config.creation_concurrency,
            &faults,
        )
        .await;

        info!(
            slots = slots.len(),
            start = config.start_index,
            project = %config.project,
            dir = %config.shm_dir.display(),
            "resource pool initialized"
        );

        let (active_tx, _) = watch::channel(BTreeSet::new());
        Self {
            config,
            slots,
            active_tx,
            faults,
        }
    }

    /// Move a slot to a new configuration.
    ///
    /// Stops the running worker (bounded wait, abandoned on expiry), then
    /// launches a worker for `config`. On success the slot becomes active
    /// with the configuration's weight; on failure it is marked inactive.
    /// Failures are logged and recorded as faults, never returned.
    /// Returns whether a worker is now running for the slot.
    pub async fn switch_configuration(&mut self, slot: SlotId, config: ConfigId) -> bool {
        let grace = self.config.stop_grace;
        let Some(entry) = self.slots.get_mut(&slot) else {
            warn!(%slot, "switch requested for unknown slot");
            return false;
        };

        if let Some(child) = entry.process.take() {
            if let Err(e) = worker::stop(slot, child, grace).await {
                warn!(%slot, error = %e, "worker did not stop in time");
                self.faults
                    .record(slot, FaultKind::TerminationTimeout, e.to_string());
            }
        }

        let launched = match self.config.worker.spawn(slot, &entry.regions, &config) {
            Ok(child) => {
                info!(%slot, config = %config, pid = child.id(), "slot switched");
                entry.process = Some(child);
                entry.active = true;
                entry.weight = weight_of(&config);
                entry.config = Some(config);
                true
            }
            Err(e) => {
                error!(%slot, config = %config, error = %e, "worker launch failed");
                entry.active = false;
                self.faults.record(slot, FaultKind::ProcessSpawn, e.to_string());
                false
            }
        };

        self.publish_active();
        launched
    }

    /// Start a worker for an inactive slot. No-op when already active.
    pub async fn activate(&mut self, slot: SlotId, config: ConfigId) -> bool {
        match self.slots.get(&slot) {
            Some(entry) if entry.active => true,
            Some(_) => self.switch_configuration(slot, config).await,
            None => {
                warn!(%slot, "activate requested for unknown slot");
                false
            }
        }
    }

    /// Stop a slot's worker. Its regions are kept.
    pub async fn deactivate(&mut self, slot: SlotId) {
        let grace = self.config.stop_grace;
        let Some(entry) = self.slots.get_mut(&slot) else {
            warn!(%slot, "deactivate requested for unknown slot");
            return;
        };
        if let Some(child) = entry.process.take() {
            if let Err(e) = worker::stop(slot, child, grace).await {
                warn!(%slot, error = %e, "worker did not stop in time");
                self.faults
                    .record(slot, FaultKind::TerminationTimeout, e.to_string());
            }
        }
        entry.active = false;
        info!(%slot, "slot deactivated");
        self.publish_active();
    }

    /// Stop every live worker concurrently. Returns how many were signalled.
    pub async fn terminate_all(&mut self) -> usize {
        let grace = self.config.stop_grace;
        let mut stops = JoinSet::new();
        for entry in self.slots.values_mut() {
            entry.active = false;
            if let Some(child) = entry.process.take() {
                let slot = entry.id;
                stops.spawn(async move { (slot, worker::stop(slot, child, grace).await) });
            }
        }

        let mut stopped = 0;
        while let Some(joined) = stops.join_next().await {
            stopped += 1;
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((slot, Err(e))) => {
                    warn!(%slot, error = %e, "worker did not stop in time");
                    self.faults
                        .record(slot, FaultKind::TerminationTimeout, e.to_string());
                }
                Err(e) => error!(error = %e, "worker stop task failed"),
            }
        }
        self.publish_active();
        stopped
    }

    /// Stop all workers and remove every region. Consumes the pool so it
    /// can only happen once.
    pub async fn cleanup(mut self) -> CleanupSummary {
        let mut summary = CleanupSummary {
            workers_stopped: self.terminate_all().await,
            ..CleanupSummary::default()
        };

        for entry in self.slots.values() {
            for path in entry.regions.paths() {
                match region::remove_region(path) {
                    Ok(true) => {
                        summary.regions_removed += 1;
                        debug!(path = %path.display(), "region removed");
                    }
                    Ok(false) => debug!(path = %path.display(), "region already absent"),
                    Err(e) => {
                        summary.failures += 1;
                        warn!(slot = %entry.id, error = %e, "region removal failed");
                        self.faults
                            .record(entry.id, FaultKind::RegionRemoval, e.to_string());
                    }
                }
            }
        }

        info!(
            workers = summary.workers_stopped,
            removed = summary.regions_removed,
            failures = summary.failures,
            "resource pool cleaned up"
        );
        summary
    }

    pub fn slot(&self, slot: SlotId) -> Option<&WorkerSlot> {
        self.slots.get(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &WorkerSlot> {
        self.slots.values()
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.keys().copied().collect()
    }

    /// Ids of active slots, ascending.
    pub fn active_slots(&self) -> Vec<SlotId> {
        self.slots
            .values()
            .filter(|s| s.active)
            .map(|s| s.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Follow changes to the active-slot set.
    pub fn subscribe_active(&self) -> watch::Receiver<BTreeSet<SlotId>> {
        self.active_tx.subscribe()
    }

    /// Edge-coverage region of every slot.
    pub fn edge_regions(&self) -> BTreeMap<SlotId, PathBuf> {
        self.slots
            .values()
            .map(|s| (s.id, s.regions.edge.clone()))
            .collect()
    }

    fn publish_active(&self) {
        let active: BTreeSet<SlotId> = self.active_slots().into_iter().collect();
        self.active_tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }
}

/// Allocate every slot's region pair with bounded concurrency.
async fn allocate_regions(
    bindings: Vec<(SlotId, RegionPair)>,
    size: u64,
    concurrency: usize,
    faults: &FaultSink,
) {
    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (slot, regions) in bindings {
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let results: Vec<_> = regions
                .paths()
                .into_iter()
                .map(|path| region::ensure_region(path, size))
                .collect();
            (slot, results)
        });
    }

    let mut created = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (slot, results) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "region allocation task failed");
                continue;
            }
        };
        for result in results {
            match result {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%slot, error = %e, "region allocation failed");
                    faults.record(slot, FaultKind::RegionCreation, e.to_string());
                }
            }
        }
    }
    debug!(created, "regions allocated");
}
