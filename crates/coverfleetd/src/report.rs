//! Human-readable console output.

use std::fmt;

use coverfleet_core::{ConfigPool, Fault, FleetSettings, SlotId};
use coverfleet_coverage::CoverageMonitor;
use coverfleet_pool::{CleanupSummary, ResourcePool};
use coverfleet_scheduler::{Policy, SaScheduler, StepReport};

const RULE_WIDTH: usize = 40;

/// Startup banner.
pub struct Banner {
    slots: u32,
    first_slot: u32,
    scenario: String,
    project: String,
    configs: Vec<String>,
}

impl Banner {
    pub fn new(settings: &FleetSettings, configs: &ConfigPool) -> Self {
        Self {
            slots: settings.num_instances,
            first_slot: settings.start_idx,
            scenario: settings.test_scenario.clone(),
            project: settings.project.clone(),
            configs: configs.as_slice().iter().map(|c| c.name()).collect(),
        }
    }
}

impl fmt::Display for Banner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.first_slot + self.slots.saturating_sub(1);
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "{:=^width$}", " coverfleet ", width = RULE_WIDTH)?;
        writeln!(f, " slots:    {} ({}..={})", self.slots, self.first_slot, last)?;
        writeln!(f, " scenario: {}", self.scenario)?;
        writeln!(f, " project:  {}", self.project)?;
        writeln!(f, " configs:  {}", self.configs.join(", "))?;
        write!(f, "{}", "=".repeat(RULE_WIDTH))
    }
}

/// Shutdown banner.
pub struct CleanupBanner(pub CleanupSummary);

impl fmt::Display for CleanupBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=^width$}", " cleanup ", width = RULE_WIDTH)?;
        writeln!(f, " workers stopped: {}", self.0.workers_stopped)?;
        writeln!(f, " regions removed: {}", self.0.regions_removed)?;
        writeln!(f, " failures:        {}", self.0.failures)?;
        write!(f, "{}", "=".repeat(RULE_WIDTH))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SlotLine {
    slot: SlotId,
    config: String,
    weight: f64,
    coverage: u64,
}

/// One iteration's status.
#[derive(Debug, Clone)]
pub struct StatusReport {
    iteration: u64,
    temperature: f64,
    policy: Policy,
    mutated: usize,
    accepted: bool,
    merged_coverage: u64,
    best_energy: Option<f64>,
    stagnation: u32,
    max_stagnant: u32,
    slots: Vec<SlotLine>,
    faults: Vec<Fault>,
}

impl StatusReport {
    pub async fn collect(
        iteration: u64,
        scheduler: &SaScheduler,
        step: &StepReport,
        pool: &ResourcePool,
        monitor: &CoverageMonitor,
        faults: Vec<Fault>,
    ) -> Self {
        let active = pool.active_slots();
        let mut slots = Vec::with_capacity(active.len());
        for &id in &active {
            let Some(slot) = pool.slot(id) else { continue };
            slots.push(SlotLine {
                slot: id,
                config: slot.config().map(|c| c.name()).unwrap_or_else(|| "-".to_string()),
                weight: slot.weight(),
                coverage: monitor.coverage_of(id).await,
            });
        }

        Self {
            iteration,
            temperature: scheduler.temperature(),
            policy: step.policy,
            mutated: step.mutated.len(),
            accepted: step.accepted,
            merged_coverage: monitor.merged_coverage(&active).await,
            best_energy: scheduler.best_energy(),
            stagnation: scheduler.stagnation(),
            max_stagnant: scheduler.params().max_stagnant,
            slots,
            faults,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "\n--- iteration {} [temperature {:.2}] ---",
            self.iteration, self.temperature
        )?;
        writeln!(
            f,
            "step: {} policy, {} slot(s) switched, {}",
            self.policy,
            self.mutated,
            if self.accepted { "accepted" } else { "rejected" }
        )?;
        writeln!(f, "merged coverage: {}", self.merged_coverage)?;
        match self.best_energy {
            Some(best) => writeln!(
                f,
                "best energy: {best:.2} | stagnation {}/{}",
                self.stagnation, self.max_stagnant
            )?,
            None => writeln!(
                f,
                "best energy: - | stagnation {}/{}",
                self.stagnation, self.max_stagnant
            )?,
        }
        writeln!(f, "active slots: {}", self.slots.len())?;
        for line in &self.slots {
            writeln!(
                f,
                "  - slot {}: {} | weight {:.1} | coverage {}",
                line.slot, line.config, line.weight, line.coverage
            )?;
        }
        for fault in &self.faults {
            writeln!(f, "{}", fault_line(fault))?;
        }
        Ok(())
    }
}

pub fn fault_line(fault: &Fault) -> String {
    format!("[WARN] {fault}")
}

pub fn reheat_notice(stagnation: u32, init_temp: f64) -> String {
    format!("\n[!] {stagnation} steps without improvement, reheating to {init_temp:.2}")
}
