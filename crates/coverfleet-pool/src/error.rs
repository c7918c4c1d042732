//! Resource pool error types.

use std::path::PathBuf;
use std::time::Duration;

use coverfleet_core::SlotId;
use thiserror::Error;

/// Errors that can occur while managing slots, regions, and workers.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create region {path}: {source}")]
    RegionCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove region {path}: {source}")]
    RegionRemoval {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch worker for slot {slot}: {source}")]
    Spawn {
        slot: SlotId,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for slot {slot} still running after {grace:?}, abandoned")]
    TerminationTimeout { slot: SlotId, grace: Duration },

    #[error("unknown slot: {0}")]
    UnknownSlot(SlotId),
}

pub type PoolResult<T> = Result<T, PoolError>;
