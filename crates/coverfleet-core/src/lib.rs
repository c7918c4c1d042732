//! coverfleet-core — types shared by every coverfleet crate.
//!
//! Holds the fixed-field records of the fleet (slots, region pairs,
//! configurations), the configuration-weight classifier, the fault
//! channel used to surface contained failures, and the `fleet.toml`
//! configuration model.

pub mod config;
pub mod error;
pub mod fault;
pub mod types;

pub use config::{AnnealingSettings, FleetFile, FleetSettings, MonitorSettings, RefreshMode, WorkerSettings};
pub use error::{ConfigError, ConfigResult};
pub use fault::{fault_channel, Fault, FaultInbox, FaultKind, FaultSink};
pub use types::*;
