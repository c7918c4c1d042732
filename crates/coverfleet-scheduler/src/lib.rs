//! coverfleet-scheduler — simulated annealing over slot assignments.
//!
//! Searches the discrete space of slot → configuration assignments for an
//! assignment with high merged coverage at low aggregate weight.
//!
//! # Energy
//!
//! ```text
//! E(set) = 0.7 · Σ weight(slot)  −  0.3 · merged_coverage(set)
//! ```
//!
//! # Step
//!
//! ```text
//! E_cur  = E(active before)
//! mutate: 80% efficiency-guided (worst coverage/weight slots → other config)
//!         20% random exploration (random slots → any config)
//! E_cand = E(active after)
//! accept if E_cand ≤ E_cur, else with p = exp(-(E_cand − E_cur) / T)
//! accepted ∧ E_cand < E_best → best := cand, stagnation := 0
//! otherwise                  → stagnation += 1
//! T := max(T · cool_rate, min_temp)
//! ```
//!
//! The mutation is applied to the live fleet before the decision and is
//! never rolled back. Reheating on stagnation is left to the caller
//! through [`SaScheduler::is_stagnant`] and [`SaScheduler::reheat`].

pub mod annealer;
pub mod candidate;
pub mod error;
pub mod fleet;
pub mod objective;

pub use annealer::{SaScheduler, StepReport};
pub use candidate::Policy;
pub use error::{SchedulerError, SchedulerResult};
pub use fleet::{CoverageView, Fleet};
