//! coverfleet-coverage — coverage observation for worker slots.
//!
//! Workers set bits in their slot's edge-coverage region; the monitor
//! keeps a copy of each region (a snapshot) and answers two questions for
//! the scheduler: how many bits one slot has set, and how many distinct
//! bits a set of slots has set together.
//!
//! # Architecture
//!
//! ```text
//! CoverageMonitor (Arc-shared)
//!   ├── regions: SlotId → edge region path (fixed)
//!   ├── watch::Receiver<active set> from the resource pool
//!   ├── Mutex<SlotId → CoverageSnapshot>
//!   └── refresh(): batched stat + mmap read on a blocking thread
//!       ├── inline: called by the driver before each step
//!       └── background: spawn_refresher() every 5s
//! ```
//!
//! Merged coverage is the popcount of the bitwise OR of the snapshots,
//! shorter buffers zero-padded, so adding slots never lowers it.

pub mod bitmap;
pub mod error;
pub mod monitor;

pub use error::{CoverageError, CoverageResult};
pub use monitor::{CoverageMonitor, CoverageSnapshot, RefreshStats};
