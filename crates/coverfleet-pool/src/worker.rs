//! Worker process launch and graceful stop.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

use coverfleet_core::{ConfigId, RegionPair, SlotId, WorkerSettings};

use crate::error::{PoolError, PoolResult};

/// Environment variable carrying the edge-coverage region path.
pub const ENV_EDGE_REGION: &str = "LUCKY_GLOBAL_MMAP_FILE";
/// Environment variable carrying the bitmap-coverage region path.
pub const ENV_BITMAP_REGION: &str = "SHM_ENV_VAR";
/// Environment variable carrying the slot id.
pub const ENV_SLOT_ID: &str = "FUZZER_INSTANCE_ID";

/// How to launch one worker.
///
/// The resulting command line is
/// `timeout <limit> <program> <args...> <config-path>`, or the same
/// without the `timeout` prefix when no limit is set.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub wall_clock_limit: Option<Duration>,
}

impl From<&WorkerSettings> for WorkerCommand {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            wall_clock_limit: settings.wall_clock_limit,
        }
    }
}

impl WorkerCommand {
    fn command(&self, slot: SlotId, regions: &RegionPair, config: &ConfigId) -> Command {
        let mut cmd = match self.wall_clock_limit {
            Some(limit) => {
                let mut cmd = Command::new("timeout");
                cmd.arg(limit.as_secs().max(1).to_string()).arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(&self.args)
            .arg(config.path())
            .env(ENV_EDGE_REGION, &regions.edge)
            .env(ENV_BITMAP_REGION, &regions.bitmap)
            .env(ENV_SLOT_ID, slot.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    /// Launch a worker bound to `slot`'s regions.
    pub fn spawn(&self, slot: SlotId, regions: &RegionPair, config: &ConfigId) -> PoolResult<Child> {
        self.command(slot, regions, config)
            .spawn()
            .map_err(|source| PoolError::Spawn { slot, source })
    }
}

/// Ask a worker to stop, waiting at most `grace` for it to exit.
///
/// Sends SIGTERM (forwarded by `timeout` to the real worker). If the
/// worker has not exited when the grace period ends, the handle is
/// dropped and the process left to exit on its own.
pub async fn stop(slot: SlotId, mut child: Child, grace: Duration) -> PoolResult<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    // `pid` is our own unreaped child, so it cannot have been recycled.
    if let Err(e) = send_sigterm(pid) {
        debug!(%slot, pid, error = %e, "SIGTERM not delivered");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(%slot, pid, ?status, "worker stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            // Nothing left to wait on.
            debug!(%slot, pid, error = %e, "wait on stopped worker failed");
            Ok(())
        }
        Err(_) => Err(PoolError::TerminationTimeout { slot, grace }),
    }
}

fn send_sigterm(pid: u32) -> std::io::Result<()> {
    // SAFETY: kill(2) takes no pointers; a bad pid is reported through errno.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
