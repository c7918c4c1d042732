//! Scheduler error types.

use thiserror::Error;

/// Errors raised when building a scheduler.
///
/// A running scheduler never fails a step: per-slot problems are
/// contained by the pool and monitor.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid annealing parameter: {0}")]
    InvalidParameter(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
