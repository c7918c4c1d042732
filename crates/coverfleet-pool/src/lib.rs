//! coverfleet-pool — worker slots bound to shared-memory coverage regions.
//!
//! The `ResourcePool` owns a fixed set of slots for the whole run. Each
//! slot is bound at creation to one edge-coverage and one bitmap-coverage
//! region and hosts at most one worker process at a time.
//!
//! # Architecture
//!
//! ```text
//! ResourcePool
//!   ├── regions: allocate once at init (bounded concurrency), remove at cleanup
//!   ├── WorkerSlot per id
//!   │   ├── RegionPair (edge, bitmap), fixed
//!   │   ├── Child (tokio::process), at most one
//!   │   └── current ConfigId + weight
//!   └── watch::Sender<active set> → CoverageMonitor
//! ```
//!
//! Switching a slot's configuration stops the running worker with SIGTERM,
//! waits up to the grace period, abandons it if it is still alive, and
//! launches the new worker under a hard wall-clock `timeout` wrapper.

pub mod error;
pub mod pool;
pub mod region;
pub mod worker;

pub use error::{PoolError, PoolResult};
pub use pool::{CleanupSummary, PoolConfig, ResourcePool, WorkerSlot};
pub use worker::WorkerCommand;
