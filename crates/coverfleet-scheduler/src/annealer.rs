//! Simulated-annealing scheduler.
//!
//! Each step mutates the live fleet first and judges the mutation after.
//! Worker processes cannot be snapshotted, so the physical assignment
//! always reflects the latest candidate; acceptance only decides whether
//! the candidate becomes the best known state. The best state drives
//! stagnation tracking and is never used to roll the fleet back.

use rand::rngs::StdRng;
use rand::seq::{index, IndexedRandom};
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use coverfleet_core::{AnnealingSettings, ConfigId, ConfigPool, FaultKind, FaultSink, SlotId};

use crate::candidate::{self, Policy, EFFICIENCY_BIAS};
use crate::error::{SchedulerError, SchedulerResult};
use crate::fleet::{CoverageView, Fleet};
use crate::objective;

/// What one step did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub policy: Policy,
    /// Slots that were switched, in switch order.
    pub mutated: Vec<SlotId>,
    /// Energy of the active set before the mutation.
    pub current_energy: f64,
    /// Energy of the active set after the mutation.
    pub candidate_energy: f64,
    pub accepted: bool,
    /// Whether the candidate became the new best state. Always `false`
    /// for [`Policy::Idle`], even before any best state exists.
    pub improved: bool,
    /// Temperature after cooling.
    pub temperature: f64,
}

/// Annealing search over slot → configuration assignments.
pub struct SaScheduler {
    params: AnnealingSettings,
    configs: ConfigPool,
    temperature: f64,
    best_state: Vec<SlotId>,
    best_energy: f64,
    stagnation: u32,
    iterations: u64,
    efficiency_bias: f64,
    rng: StdRng,
    faults: FaultSink,
}

impl SaScheduler {
    /// Build a scheduler without touching the fleet.
    pub fn new(params: AnnealingSettings, configs: ConfigPool) -> SchedulerResult<Self> {
        validate(&params)?;
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            temperature: params.init_temp,
            params,
            configs,
            best_state: Vec::new(),
            best_energy: f64::INFINITY,
            stagnation: 0,
            iterations: 0,
            efficiency_bias: EFFICIENCY_BIAS,
            rng,
            faults: FaultSink::detached(),
        })
    }

    /// Build a scheduler and give every slot a uniformly random
    /// configuration.
    pub async fn start<F: Fleet>(
        params: AnnealingSettings,
        configs: ConfigPool,
        fleet: &mut F,
    ) -> SchedulerResult<Self> {
        let mut scheduler = Self::new(params, configs)?;
        scheduler.assign_initial(fleet).await;
        Ok(scheduler)
    }

    /// Record contained failures (degenerate candidates) on `faults`.
    pub fn with_faults(mut self, faults: FaultSink) -> Self {
        self.faults = faults;
        self
    }

    /// Probability of choosing the efficiency-guided policy, clamped to [0, 1].
    pub fn with_efficiency_bias(mut self, bias: f64) -> Self {
        self.efficiency_bias = bias.clamp(0.0, 1.0);
        self
    }

    /// Give every slot a uniformly random configuration.
    pub async fn assign_initial<F: Fleet>(&mut self, fleet: &mut F) {
        let slots = fleet.slot_ids();
        for &slot in &slots {
            let config = self.pick_any();
            fleet.switch_configuration(slot, config).await;
        }
        info!(
            slots = slots.len(),
            active = fleet.active_slots().len(),
            "initial configurations assigned"
        );
    }

    /// Advance the search by one step.
    ///
    /// 1. Energy of the current active set.
    /// 2. Mutate the fleet (eagerly, through [`Fleet::switch_configuration`]).
    /// 3. Energy of the resulting active set.
    /// 4. Metropolis accept/reject, best-state and stagnation bookkeeping.
    /// 5. Cool.
    pub async fn step<F: Fleet, C: CoverageView>(&mut self, fleet: &mut F, coverage: &C) -> StepReport {
        let before = fleet.active_slots();
        let current_energy = energy_of(fleet, coverage, &before).await;

        let k = candidate::batch_size(before.len());
        let policy = if before.is_empty() {
            Policy::Idle
        } else if self.rng.random_bool(self.efficiency_bias) {
            Policy::EfficiencyGuided
        } else {
            Policy::RandomExploration
        };
        let mutated = match policy {
            Policy::EfficiencyGuided => self.replace_least_efficient(fleet, coverage, &before, k).await,
            Policy::RandomExploration => self.explore(fleet, &before, k).await,
            Policy::Idle => Vec::new(),
        };

        let after = fleet.active_slots();
        let candidate_energy = energy_of(fleet, coverage, &after).await;

        let p = objective::acceptance_probability(current_energy, candidate_energy, self.temperature);
        let accepted = p >= 1.0 || self.rng.random::<f64>() < p;
        // An idle step has no candidate to record.
        let improved = accepted && policy != Policy::Idle && candidate_energy < self.best_energy;
        if improved {
            self.best_state = after;
            self.best_energy = candidate_energy;
            self.stagnation = 0;
        } else {
            self.stagnation = self.stagnation.saturating_add(1);
        }

        self.temperature =
            objective::next_temperature(self.temperature, self.params.cool_rate, self.params.min_temp);
        self.iterations += 1;

        debug!(
            iteration = self.iterations,
            %policy,
            mutated = mutated.len(),
            current_energy,
            candidate_energy,
            accepted,
            improved,
            stagnation = self.stagnation,
            temperature = self.temperature,
            "annealing step"
        );

        StepReport {
            policy,
            mutated,
            current_energy,
            candidate_energy,
            accepted,
            improved,
            temperature: self.temperature,
        }
    }

    /// Whether the stagnation counter has reached its bound.
    pub fn is_stagnant(&self) -> bool {
        self.stagnation >= self.params.max_stagnant
    }

    /// Restore the initial temperature and clear stagnation.
    pub fn reheat(&mut self) {
        info!(
            stagnation = self.stagnation,
            temperature = self.params.init_temp,
            "reheating after stagnation"
        );
        self.temperature = self.params.init_temp;
        self.stagnation = 0;
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn stagnation(&self) -> u32 {
        self.stagnation
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn params(&self) -> &AnnealingSettings {
        &self.params
    }

    /// Best energy seen so far; `None` before the first improving step.
    pub fn best_energy(&self) -> Option<f64> {
        self.best_energy.is_finite().then_some(self.best_energy)
    }

    /// Active set at the best energy.
    pub fn best_state(&self) -> &[SlotId] {
        &self.best_state
    }

    // ── Candidate generation ────────────────────────────────────────

    /// Switch the `k` slots with the lowest coverage-per-weight to a
    /// configuration other than their current one.
    async fn replace_least_efficient<F: Fleet, C: CoverageView>(
        &mut self,
        fleet: &mut F,
        coverage: &C,
        active: &[SlotId],
        k: usize,
    ) -> Vec<SlotId> {
        let mut scored = Vec::with_capacity(active.len());
        for &slot in active {
            let covered = coverage.coverage_of(slot).await;
            scored.push((slot, candidate::efficiency(covered, fleet.weight(slot))));
        }

        let worst: Vec<SlotId> = candidate::rank_by_efficiency(scored)
            .into_iter()
            .take(k)
            .collect();
        for &slot in &worst {
            let current = fleet.current_config(slot);
            let config = self.pick_alternative(slot, current);
            fleet.switch_configuration(slot, config).await;
        }
        worst
    }

    /// Switch `k` random active slots to any configuration.
    async fn explore<F: Fleet>(&mut self, fleet: &mut F, active: &[SlotId], k: usize) -> Vec<SlotId> {
        let chosen: Vec<SlotId> = index::sample(&mut self.rng, active.len(), k)
            .into_iter()
            .map(|i| active[i])
            .collect();
        for &slot in &chosen {
            let config = self.pick_any();
            fleet.switch_configuration(slot, config).await;
        }
        chosen
    }

    fn pick_any(&mut self) -> ConfigId {
        let configs = self.configs.as_slice();
        configs[self.rng.random_range(0..configs.len())].clone()
    }

    /// A configuration different from `current`, or `current` itself when
    /// the pool offers no alternative (a plain restart).
    fn pick_alternative(&mut self, slot: SlotId, current: Option<ConfigId>) -> ConfigId {
        let alternatives = self.configs.alternatives(current.as_ref());
        if let Some(config) = alternatives.choose(&mut self.rng) {
            return (*config).clone();
        }
        debug!(%slot, "no alternative configuration, restarting current one");
        self.faults.record(
            slot,
            FaultKind::DegenerateCandidate,
            "no alternative configuration; restarted the current one",
        );
        current.unwrap_or_else(|| self.pick_any())
    }
}

/// Energy of an active set under the fleet's current weights.
async fn energy_of<F: Fleet, C: CoverageView>(fleet: &F, coverage: &C, slots: &[SlotId]) -> f64 {
    let total_weight: f64 = slots.iter().map(|&slot| fleet.weight(slot)).sum();
    let merged = coverage.merged_coverage(slots).await;
    objective::energy(total_weight, merged)
}

fn validate(params: &AnnealingSettings) -> SchedulerResult<()> {
    let invalid = |msg: String| Err(SchedulerError::InvalidParameter(msg));
    for (name, value) in [
        ("init_temp", params.init_temp),
        ("cool_rate", params.cool_rate),
        ("min_temp", params.min_temp),
    ] {
        if !value.is_finite() {
            return invalid(format!("{name} must be finite, got {value}"));
        }
    }
    if !(params.min_temp > 0.0) {
        return invalid(format!("min_temp must be positive, got {}", params.min_temp));
    }
    if !(params.cool_rate > 0.0 && params.cool_rate <= 1.0) {
        return invalid(format!("cool_rate must be in (0, 1], got {}", params.cool_rate));
    }
    if params.init_temp < params.min_temp {
        return invalid(format!(
            "init_temp {} is below min_temp {}",
            params.init_temp, params.min_temp
        ));
    }
    if params.max_stagnant == 0 {
        return invalid("max_stagnant must be at least 1".to_string());
    }
    Ok(())
}
