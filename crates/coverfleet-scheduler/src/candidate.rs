//! Candidate generation policies.

use std::fmt;

use coverfleet_core::SlotId;

/// Share of the active set touched by one mutation.
pub const BATCH_FRACTION: f64 = 0.05;
/// Default probability of the efficiency-guided policy.
pub const EFFICIENCY_BIAS: f64 = 0.8;
/// Keeps the efficiency ratio finite.
pub const EPSILON: f64 = 1e-6;

/// How a step's candidate was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Reassign the least efficient slots to a different configuration.
    EfficiencyGuided,
    /// Reassign random slots to any configuration.
    RandomExploration,
    /// Nothing to mutate: no slot is active.
    Idle,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Policy::EfficiencyGuided => "efficiency",
            Policy::RandomExploration => "explore",
            Policy::Idle => "idle",
        })
    }
}

/// Slots mutated per step: 5% of the active set, at least one, at most all.
pub fn batch_size(active: usize) -> usize {
    ((active as f64 * BATCH_FRACTION).floor() as usize)
        .max(1)
        .min(active)
}

/// Coverage per unit of weight.
pub fn efficiency(coverage: u64, weight: f64) -> f64 {
    coverage as f64 / (weight + EPSILON)
}

/// Order slots from least to most efficient. Ties keep input order.
pub fn rank_by_efficiency(mut scored: Vec<(SlotId, f64)>) -> Vec<SlotId> {
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.into_iter().map(|(slot, _)| slot).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_five_percent_with_floor_of_one() {
        assert_eq!(batch_size(0), 0);
        assert_eq!(batch_size(1), 1);
        assert_eq!(batch_size(19), 1);
        assert_eq!(batch_size(20), 1);
        assert_eq!(batch_size(40), 2);
        assert_eq!(batch_size(64), 3);
        assert_eq!(batch_size(200), 10);
    }

    #[test]
    fn efficiency_penalizes_weight() {
        assert!(efficiency(100, 2.0) < efficiency(100, 1.0));
        assert_eq!(efficiency(0, 1.5), 0.0);
    }

    #[test]
    fn ranking_is_ascending_and_stable() {
        let ranked = rank_by_efficiency(vec![
            (SlotId(1), 50.0),
            (SlotId(2), 0.0),
            (SlotId(3), 10.0),
            (SlotId(4), 0.0),
        ]);
        assert_eq!(ranked, vec![SlotId(2), SlotId(4), SlotId(3), SlotId(1)]);
    }
}
