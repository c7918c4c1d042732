//! The drive loop: refresh, step, report, reheat, sleep.
//!
//! The loop runs on its own task so that a panic inside it still leaves
//! the pool reachable for cleanup. It stops when the shared stop flag is
//! raised or its sender is dropped.

use std::sync::Arc;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use coverfleet_core::{fault_channel, ConfigPool, FaultInbox, FaultSink, FleetSettings, RefreshMode};
use coverfleet_coverage::CoverageMonitor;
use coverfleet_pool::{CleanupSummary, PoolConfig, ResourcePool};
use coverfleet_scheduler::SaScheduler;

use crate::report::{self, Banner, CleanupBanner, StatusReport};

/// SIGINT / SIGTERM listeners. Installed before any worker starts so an
/// early interrupt is held until the loop can act on it.
struct Shutdown {
    interrupt: Signal,
    terminate: Signal,
}

impl Shutdown {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Pool state shared between the drive task and the cleanup path.
struct FleetState {
    pool: ResourcePool,
    inbox: FaultInbox,
}

type SharedFleet = Arc<Mutex<Option<FleetState>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DriveStats {
    iterations: u64,
    reheats: u64,
}

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub reheats: u64,
    pub cleanup: CleanupSummary,
}

/// Run the fleet until SIGINT or SIGTERM.
pub async fn run(settings: FleetSettings) -> anyhow::Result<()> {
    let mut shutdown = Shutdown::install()?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let listener = tokio::spawn(async move {
        let name = shutdown.recv().await;
        info!(signal = name, "shutdown requested");
        let _ = stop_tx.send(true);
    });

    let outcome = run_until(settings, stop_rx).await;
    listener.abort();
    let summary = outcome?;
    info!(
        iterations = summary.iterations,
        reheats = summary.reheats,
        "coverfleet daemon stopped"
    );
    Ok(())
}

/// Run the fleet until `stop` turns true or its sender goes away. The
/// pool is always cleaned up, also when the loop fails or panics.
pub async fn run_until(settings: FleetSettings, stop: watch::Receiver<bool>) -> anyhow::Result<RunSummary> {
    let configs = ConfigPool::from_paths(settings.config_pool.iter().cloned())?;

    println!("{}", Banner::new(&settings, &configs));

    let (faults, inbox) = fault_channel();
    let pool = ResourcePool::initialize(PoolConfig::from_settings(&settings), faults.clone()).await;
    let monitor = CoverageMonitor::new(
        pool.edge_regions(),
        pool.subscribe_active(),
        settings.monitor.batch_size,
        faults.clone(),
    );
    let fleet: SharedFleet = Arc::new(Mutex::new(Some(FleetState { pool, inbox })));

    let (refresher_tx, refresher_rx) = watch::channel(false);
    let refresher = match settings.monitor.mode {
        RefreshMode::Background => {
            info!(
                cadence_secs = settings.monitor.cadence.as_secs(),
                "background coverage refresh started"
            );
            Some(monitor.spawn_refresher(settings.monitor.cadence, refresher_rx))
        }
        RefreshMode::Inline => None,
    };

    let task = tokio::spawn(drive(settings, configs, Arc::clone(&fleet), monitor, faults, stop));
    let outcome = join_drive(task).await;
    if let Err(e) = &outcome {
        warn!(error = %e, "drive loop failed");
    }

    if let Some(handle) = refresher {
        let _ = refresher_tx.send(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "coverage refresher task failed");
        }
    }

    let cleanup = release(&fleet).await?;
    let stats = outcome?;
    Ok(RunSummary {
        iterations: stats.iterations,
        reheats: stats.reheats,
        cleanup,
    })
}

/// Wait for the drive task. A panic or cancellation becomes an error.
async fn join_drive(task: JoinHandle<anyhow::Result<DriveStats>>) -> anyhow::Result<DriveStats> {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(anyhow::anyhow!("drive loop panicked: {e}")),
        Err(e) => Err(anyhow::anyhow!("drive loop cancelled: {e}")),
    }
}

/// Take the pool back from the drive task and tear it down.
async fn release(fleet: &Mutex<Option<FleetState>>) -> anyhow::Result<CleanupSummary> {
    let Some(FleetState { pool, mut inbox }) = fleet.lock().await.take() else {
        anyhow::bail!("worker pool already released");
    };
    let summary = pool.cleanup().await;
    for fault in inbox.drain() {
        println!("{}", report::fault_line(&fault));
    }
    println!("{}", CleanupBanner(summary));
    Ok(summary)
}

async fn drive(
    settings: FleetSettings,
    configs: ConfigPool,
    fleet: SharedFleet,
    monitor: CoverageMonitor,
    faults: FaultSink,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<DriveStats> {
    let mut guard = fleet.lock().await;
    let Some(FleetState { pool, inbox }) = guard.as_mut() else {
        anyhow::bail!("worker pool already released");
    };

    let mut scheduler = SaScheduler::new(settings.annealing.clone(), configs)?.with_faults(faults);
    scheduler.assign_initial(pool).await;

    let mut stats = DriveStats::default();
    loop {
        stats.iterations += 1;
        if settings.monitor.mode == RefreshMode::Inline {
            monitor.refresh().await;
        }

        let step = scheduler.step(pool, &monitor).await;
        let status =
            StatusReport::collect(stats.iterations, &scheduler, &step, pool, &monitor, inbox.drain()).await;
        print!("{status}");

        if scheduler.is_stagnant() {
            println!("{}", report::reheat_notice(scheduler.stagnation(), scheduler.params().init_temp));
            scheduler.reheat();
            stats.reheats += 1;
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            changed = stop.changed() => {
                // A dropped sender can never raise the flag; treat it as a stop.
                if changed.is_err() || *stop.borrow() {
                    info!(iterations = stats.iterations, "drive loop stopping");
                    return Ok(stats);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use coverfleet_core::{ConfigId, FleetFile, SlotId, WorkerSettings};

    fn settings(shm_dir: &Path) -> FleetSettings {
        let mut file = FleetFile::default();
        file.fleet.num_instances = Some(2);
        file.fleet.project = Some("drv".into());
        file.fleet.test_scenario = Some("smoke".into());
        file.fleet.config_pool = Some(vec!["a.xml".into(), "b.xml".into()]);
        file.worker.fuzzer = Some("/bin/sh".into());
        file.annealing.max_stagnant = Some(1);
        file.annealing.seed = Some(1);
        let mut settings = file.resolve().unwrap();

        settings.interval = Duration::from_millis(50);
        settings.shm_dir = shm_dir.to_path_buf();
        settings.region_size = 4096;
        settings.worker = WorkerSettings {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exec sleep 30".into(), "worker".into()],
            wall_clock_limit: None,
        };
        settings
    }

    fn shm_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn stop_flag_ends_the_run_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(800)).await;
            let _ = stop_tx.send(true);
        };

        let (outcome, ()) = tokio::join!(run_until(settings(dir.path()), stop_rx), stopper);
        let summary = outcome.unwrap();

        // Equal weights and untouched regions never beat the first step.
        assert!(summary.iterations >= 2);
        assert!(summary.reheats >= 1);
        assert_eq!(summary.cleanup.workers_stopped, 2);
        assert_eq!(summary.cleanup.regions_removed, 4);
        assert_eq!(summary.cleanup.failures, 0);
        assert_eq!(shm_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn dropped_stop_sender_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let summary = run_until(settings(dir.path()), stop_rx).await.unwrap();
        assert_eq!(summary.iterations, 1);
        assert_eq!(shm_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn scheduler_error_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.annealing.cool_rate = 0.0;
        let (_stop_tx, stop_rx) = watch::channel(false);

        assert!(run_until(settings, stop_rx).await.is_err());
        assert_eq!(shm_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn panicking_drive_task_still_releases_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (faults, inbox) = fault_channel();
        let pool = ResourcePool::initialize(PoolConfig::from_settings(&settings), faults).await;
        let fleet: SharedFleet = Arc::new(Mutex::new(Some(FleetState { pool, inbox })));

        let held = Arc::clone(&fleet);
        let task = tokio::spawn(async move {
            let mut guard = held.lock().await;
            let state = guard.as_mut().ok_or_else(|| anyhow::anyhow!("released"))?;
            if state.pool.activate(SlotId(1), ConfigId::new("a.xml")).await {
                panic!("step blew up");
            }
            Ok(DriveStats::default())
        });

        let err = join_drive(task).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));

        let cleanup = release(&fleet).await.unwrap();
        assert_eq!(cleanup.workers_stopped, 1);
        assert_eq!(cleanup.failures, 0);
        assert_eq!(shm_entries(dir.path()), 0);
        assert!(release(&fleet).await.is_err());
    }
}
