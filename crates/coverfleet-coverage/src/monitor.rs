//! Coverage monitor: per-slot snapshots of the edge-coverage regions.
//!
//! One refresh routine serves both driving modes: the driver may call
//! [`CoverageMonitor::refresh`] before every scheduler step, or start a
//! background task with [`CoverageMonitor::spawn_refresher`] that runs it
//! on a fixed cadence. Slots are processed in fixed-size batches so only
//! `batch_size` region files are open at once; each batch is read on a
//! blocking thread and then applied under the snapshot lock in one go.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use memmap2::MmapOptions;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use coverfleet_core::{FaultKind, FaultSink, SlotId};

use crate::bitmap;
use crate::error::{CoverageError, CoverageResult};

/// The last successfully read contents of a slot's edge region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSnapshot {
    pub data: Vec<u8>,
    /// Modification time of the region when it was read.
    pub modified: SystemTime,
}

/// Counters from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

struct Inner {
    /// Edge region of every slot. Fixed for the run.
    regions: BTreeMap<SlotId, PathBuf>,
    /// Active slots, published by the resource pool.
    active: watch::Receiver<BTreeSet<SlotId>>,
    /// The only structure shared with the background refresher.
    snapshots: Mutex<HashMap<SlotId, CoverageSnapshot>>,
    batch_size: usize,
    faults: FaultSink,
}

/// Observes slot coverage. Cheap to clone; clones share snapshots.
#[derive(Clone)]
pub struct CoverageMonitor {
    inner: Arc<Inner>,
}

impl CoverageMonitor {
    pub const DEFAULT_BATCH_SIZE: usize = 16;

    pub fn new(
        regions: BTreeMap<SlotId, PathBuf>,
        active: watch::Receiver<BTreeSet<SlotId>>,
        batch_size: usize,
        faults: FaultSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                regions,
                active,
                snapshots: Mutex::new(HashMap::new()),
                batch_size: batch_size.max(1),
                faults,
            }),
        }
    }

    /// Re-read every active slot whose region changed since its last read.
    ///
    /// A newer region replaces the slot's snapshot wholesale. Unreadable
    /// regions are logged, recorded as faults, and retried next time.
    pub async fn refresh(&self) -> RefreshStats {
        let targets: Vec<(SlotId, PathBuf)> = {
            let active = self.inner.active.borrow();
            active
                .iter()
                .filter_map(|slot| {
                    self.inner
                        .regions
                        .get(slot)
                        .map(|path| (*slot, path.clone()))
                })
                .collect()
        };

        let mut stats = RefreshStats::default();
        for batch in targets.chunks(self.inner.batch_size) {
            let work: Vec<(SlotId, PathBuf, Option<SystemTime>)> = {
                let snapshots = self.inner.snapshots.lock().await;
                batch
                    .iter()
                    .map(|(slot, path)| {
                        let seen = snapshots.get(slot).map(|s| s.modified);
                        (*slot, path.clone(), seen)
                    })
                    .collect()
            };

            let reads = tokio::task::spawn_blocking(move || {
                work.into_iter()
                    .map(|(slot, path, seen)| (slot, read_if_newer(&path, seen)))
                    .collect::<Vec<_>>()
            })
            .await;
            let reads = match reads {
                Ok(reads) => reads,
                Err(e) => {
                    error!(error = %e, "coverage read task failed");
                    continue;
                }
            };

            let mut snapshots = self.inner.snapshots.lock().await;
            for (slot, result) in reads {
                stats.checked += 1;
                match result {
                    Ok(Some(snapshot)) => {
                        snapshots.insert(slot, snapshot);
                        stats.updated += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        stats.failed += 1;
                        warn!(%slot, error = %e, "coverage refresh failed");
                        self.inner
                            .faults
                            .record(slot, FaultKind::CoverageRead, e.to_string());
                    }
                }
            }
        }

        debug!(
            checked = stats.checked,
            updated = stats.updated,
            failed = stats.failed,
            "coverage refreshed"
        );
        stats
    }

    /// Run [`refresh`](Self::refresh) now and then every `cadence` until
    /// `shutdown` fires. Readers may see data up to one cadence old.
    pub fn spawn_refresher(
        &self,
        cadence: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            info!(cadence_secs = cadence.as_secs(), "background coverage refresh started");
            loop {
                monitor.refresh().await;
                tokio::select! {
                    _ = tokio::time::sleep(cadence) => {}
                    _ = shutdown.changed() => {
                        debug!("background coverage refresh shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Set bits in the slot's snapshot; 0 when it has none.
    pub async fn coverage_of(&self, slot: SlotId) -> u64 {
        let snapshots = self.inner.snapshots.lock().await;
        snapshots
            .get(&slot)
            .map(|s| bitmap::popcount(&s.data))
            .unwrap_or(0)
    }

    /// Set bits in the OR of the given slots' snapshots; 0 for no slots.
    pub async fn merged_coverage(&self, slots: &[SlotId]) -> u64 {
        let snapshots = self.inner.snapshots.lock().await;
        bitmap::merged_popcount(
            slots
                .iter()
                .filter_map(|slot| snapshots.get(slot))
                .map(|s| s.data.as_slice()),
        )
    }

    pub async fn snapshot(&self, slot: SlotId) -> Option<CoverageSnapshot> {
        self.inner.snapshots.lock().await.get(&slot).cloned()
    }
}

/// Read the region when it changed after `seen`. Empty regions are skipped.
fn read_if_newer(path: &Path, seen: Option<SystemTime>) -> CoverageResult<Option<CoverageSnapshot>> {
    let stat_err = |source| CoverageError::Metadata {
        path: path.to_path_buf(),
        source,
    };
    let read_err = |source| CoverageError::Read {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::metadata(path).map_err(stat_err)?;
    let modified = meta.modified().map_err(stat_err)?;
    if seen.is_some_and(|t| modified <= t) || meta.len() == 0 {
        return Ok(None);
    }

    let len = usize::try_from(meta.len()).map_err(|e| read_err(std::io::Error::other(e)))?;
    let file = File::open(path).map_err(read_err)?;
    // SAFETY: the map is read-only and copied out immediately. Workers may
    // set bits concurrently; a torn read only lags behind by those bits.
    // Only the length seen at stat time is mapped, so later growth is
    // ignored. Regions are fixed-size: neither the pool nor a worker may
    // truncate one while it is in use, as touching pages past the new end
    // of a mapped file raises SIGBUS.
    let map = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(read_err)?;
    if map.is_empty() {
        return Ok(None);
    }
    Ok(Some(CoverageSnapshot {
        data: map.to_vec(),
        modified,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverfleet_core::fault_channel;

    struct Fixture {
        dir: tempfile::TempDir,
        active_tx: watch::Sender<BTreeSet<SlotId>>,
        monitor: CoverageMonitor,
    }

    impl Fixture {
        fn new(slots: u32, batch_size: usize, faults: FaultSink) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let regions = (1..=slots)
                .map(|i| (SlotId(i), dir.path().join(format!("p_edge_{i}"))))
                .collect();
            let (active_tx, active_rx) = watch::channel(BTreeSet::new());
            let monitor = CoverageMonitor::new(regions, active_rx, batch_size, faults);
            Self {
                dir,
                active_tx,
                monitor,
            }
        }

        fn path(&self, slot: u32) -> PathBuf {
            self.dir.path().join(format!("p_edge_{slot}"))
        }

        fn write(&self, slot: u32, data: &[u8]) {
            fs::write(self.path(slot), data).unwrap();
        }

        /// Rewrite a region and push its mtime forward so the change is
        /// visible regardless of filesystem timestamp granularity.
        fn rewrite(&self, slot: u32, data: &[u8], ahead: Duration) {
            self.write(slot, data);
            let file = File::options().write(true).open(self.path(slot)).unwrap();
            file.set_modified(SystemTime::now() + ahead).unwrap();
        }

        fn activate(&self, slots: &[u32]) {
            self.active_tx
                .send_replace(slots.iter().copied().map(SlotId).collect());
        }
    }

    #[tokio::test]
    async fn refresh_reads_only_active_slots() {
        let fx = Fixture::new(2, 16, FaultSink::detached());
        fx.write(1, &[0x0F]);
        fx.write(2, &[0xFF]);
        fx.activate(&[1]);

        let stats = fx.monitor.refresh().await;
        assert_eq!(stats, RefreshStats { checked: 1, updated: 1, failed: 0 });
        assert_eq!(fx.monitor.coverage_of(SlotId(1)).await, 4);
        assert_eq!(fx.monitor.coverage_of(SlotId(2)).await, 0);
    }

    #[tokio::test]
    async fn unchanged_region_is_not_reread() {
        let fx = Fixture::new(1, 16, FaultSink::detached());
        fx.write(1, &[0x01]);
        fx.activate(&[1]);

        fx.monitor.refresh().await;
        let stats = fx.monitor.refresh().await;
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.updated, 0);
    }

    #[tokio::test]
    async fn newer_region_replaces_snapshot_wholesale() {
        let fx = Fixture::new(1, 16, FaultSink::detached());
        fx.write(1, &[0xFF, 0xFF]);
        fx.activate(&[1]);
        fx.monitor.refresh().await;
        assert_eq!(fx.monitor.coverage_of(SlotId(1)).await, 16);

        fx.rewrite(1, &[0x01], Duration::from_secs(10));
        let stats = fx.monitor.refresh().await;
        assert_eq!(stats.updated, 1);

        let snapshot = fx.monitor.snapshot(SlotId(1)).await.unwrap();
        assert_eq!(snapshot.data, vec![0x01]);
        assert_eq!(fx.monitor.coverage_of(SlotId(1)).await, 1);
    }

    #[tokio::test]
    async fn unreadable_region_is_skipped_and_reported() {
        let (sink, mut inbox) = fault_channel();
        let fx = Fixture::new(3, 16, sink);
        fx.write(1, &[0x03]);
        // Slot 2 has no region file at all.
        fx.write(3, &[0x07]);
        fx.activate(&[1, 2, 3]);

        let stats = fx.monitor.refresh().await;
        assert_eq!(stats, RefreshStats { checked: 3, updated: 2, failed: 1 });
        assert_eq!(fx.monitor.merged_coverage(&[SlotId(1), SlotId(3)]).await, 3);

        let faults = inbox.drain();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].slot, SlotId(2));
        assert_eq!(faults[0].kind, FaultKind::CoverageRead);
    }

    #[tokio::test]
    async fn empty_region_produces_no_snapshot() {
        let fx = Fixture::new(1, 16, FaultSink::detached());
        fx.write(1, &[]);
        fx.activate(&[1]);

        let stats = fx.monitor.refresh().await;
        assert_eq!(stats.updated, 0);
        assert!(fx.monitor.snapshot(SlotId(1)).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_spans_the_whole_fixed_size_region() {
        use std::io::{Seek, SeekFrom, Write};

        let fx = Fixture::new(1, 16, FaultSink::detached());
        fx.write(1, &[0u8; 4096]);
        // Set bits in place, the way a worker does.
        let mut file = File::options().write(true).open(fx.path(1)).unwrap();
        file.seek(SeekFrom::Start(4095)).unwrap();
        file.write_all(&[0x81]).unwrap();
        drop(file);
        fx.activate(&[1]);

        fx.monitor.refresh().await;
        let snapshot = fx.monitor.snapshot(SlotId(1)).await.unwrap();
        assert_eq!(snapshot.data.len(), 4096);
        assert_eq!(fx.monitor.coverage_of(SlotId(1)).await, 2);
    }

    #[tokio::test]
    async fn batches_cover_every_active_slot() {
        let fx = Fixture::new(5, 2, FaultSink::detached());
        for slot in 1..=5 {
            fx.write(slot, &[1 << (slot - 1)]);
        }
        fx.activate(&[1, 2, 3, 4, 5]);

        let stats = fx.monitor.refresh().await;
        assert_eq!(stats.updated, 5);
        let all: Vec<SlotId> = (1..=5).map(SlotId).collect();
        assert_eq!(fx.monitor.merged_coverage(&all).await, 5);
    }

    #[tokio::test]
    async fn merged_coverage_of_disjoint_slots() {
        let fx = Fixture::new(2, 16, FaultSink::detached());
        fx.write(1, &[0x0F]);
        fx.write(2, &[0xF0]);
        fx.activate(&[1, 2]);
        fx.monitor.refresh().await;

        assert_eq!(fx.monitor.merged_coverage(&[SlotId(1), SlotId(2)]).await, 8);
    }

    #[tokio::test]
    async fn merged_coverage_pads_shorter_snapshots() {
        let fx = Fixture::new(2, 16, FaultSink::detached());
        fx.write(1, &[0x0F, 0xFF]);
        fx.write(2, &[0xFF]);
        fx.activate(&[1, 2]);
        fx.monitor.refresh().await;

        assert_eq!(fx.monitor.merged_coverage(&[SlotId(1), SlotId(2)]).await, 16);
    }

    #[tokio::test]
    async fn merged_coverage_of_nothing_is_zero() {
        let fx = Fixture::new(1, 16, FaultSink::detached());
        assert_eq!(fx.monitor.merged_coverage(&[]).await, 0);
        assert_eq!(fx.monitor.coverage_of(SlotId(1)).await, 0);
    }

    #[tokio::test]
    async fn merged_coverage_grows_with_slots() {
        let fx = Fixture::new(4, 16, FaultSink::detached());
        fx.write(1, &[0x01, 0x00]);
        fx.write(2, &[0x03]);
        fx.write(3, &[0x00, 0xF0, 0x0F]);
        fx.write(4, &[0x80]);
        fx.activate(&[1, 2, 3, 4]);
        fx.monitor.refresh().await;

        let mut previous = 0;
        let mut set = Vec::new();
        for slot in 1..=4 {
            set.push(SlotId(slot));
            let merged = fx.monitor.merged_coverage(&set).await;
            assert!(merged >= previous);
            previous = merged;
        }
        assert_eq!(previous, 11);
    }

    #[tokio::test]
    async fn background_refresher_updates_and_stops() {
        let fx = Fixture::new(1, 16, FaultSink::detached());
        fx.write(1, &[0xFF]);
        fx.activate(&[1]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = fx
            .monitor
            .spawn_refresher(Duration::from_millis(50), shutdown_rx);

        let mut seen = 0;
        for _ in 0..40 {
            seen = fx.monitor.coverage_of(SlotId(1)).await;
            if seen > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(seen, 8);

        fx.rewrite(1, &[0xFF, 0xFF], Duration::from_secs(10));
        let mut seen = 0;
        for _ in 0..40 {
            seen = fx.monitor.coverage_of(SlotId(1)).await;
            if seen == 16 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(seen, 16);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
