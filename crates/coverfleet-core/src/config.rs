//! fleet.toml configuration model.
//!
//! Settings come from three layers: built-in defaults, an optional TOML
//! file, and command-line flags. Both the file and the CLI are expressed
//! as a [`FleetFile`] whose fields are all optional; [`FleetFile::overlay`]
//! stacks them and [`FleetFile::resolve`] validates the result into
//! concrete [`FleetSettings`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_START_IDX: u32 = 1;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_INIT_TEMP: f64 = 1000.0;
pub const DEFAULT_COOL_RATE: f64 = 0.95;
pub const DEFAULT_MIN_TEMP: f64 = 1.0;
pub const DEFAULT_MAX_STAGNANT: u32 = 20;
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";
pub const DEFAULT_REGION_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_WALL_CLOCK_LIMIT_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_REFRESH_CADENCE_SECS: u64 = 5;
pub const DEFAULT_REFRESH_BATCH: usize = 16;

/// Fleets at or above this size get a wider interval and a tighter
/// stagnation bound.
pub const LARGE_FLEET_THRESHOLD: u32 = 32;
pub const LARGE_FLEET_MIN_INTERVAL_SECS: u64 = 120;
pub const LARGE_FLEET_MAX_STAGNANT: u32 = 10;

/// How the coverage monitor is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Refreshed by the driver right before every scheduler step.
    #[default]
    Inline,
    /// Refreshed on a fixed cadence by a background task.
    Background,
}

impl FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "sync" => Ok(RefreshMode::Inline),
            "background" | "async" => Ok(RefreshMode::Background),
            other => Err(format!("unknown refresh mode '{other}' (expected inline or background)")),
        }
    }
}

// ── File / CLI layer ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    #[serde(default)]
    pub fleet: FleetSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub annealing: AnnealingSection,
    #[serde(default)]
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetSection {
    pub num_instances: Option<u32>,
    pub start_idx: Option<u32>,
    pub project: Option<String>,
    pub test_scenario: Option<String>,
    pub config_pool: Option<Vec<PathBuf>>,
    pub interval: Option<u64>,
    pub shm_dir: Option<PathBuf>,
    pub region_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    pub fuzzer: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub wall_clock_limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnealingSection {
    pub init_temp: Option<f64>,
    pub cool_rate: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_stagnant: Option<u32>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorSection {
    pub refresh: Option<RefreshMode>,
    pub batch_size: Option<usize>,
}

impl FleetFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stack `self` on top of `lower`: every value set here wins.
    pub fn overlay(self, lower: FleetFile) -> FleetFile {
        FleetFile {
            fleet: FleetSection {
                num_instances: self.fleet.num_instances.or(lower.fleet.num_instances),
                start_idx: self.fleet.start_idx.or(lower.fleet.start_idx),
                project: self.fleet.project.or(lower.fleet.project),
                test_scenario: self.fleet.test_scenario.or(lower.fleet.test_scenario),
                config_pool: self.fleet.config_pool.or(lower.fleet.config_pool),
                interval: self.fleet.interval.or(lower.fleet.interval),
                shm_dir: self.fleet.shm_dir.or(lower.fleet.shm_dir),
                region_size: self.fleet.region_size.or(lower.fleet.region_size),
            },
            worker: WorkerSection {
                fuzzer: self.worker.fuzzer.or(lower.worker.fuzzer),
                args: self.worker.args.or(lower.worker.args),
                wall_clock_limit: self.worker.wall_clock_limit.or(lower.worker.wall_clock_limit),
            },
            annealing: AnnealingSection {
                init_temp: self.annealing.init_temp.or(lower.annealing.init_temp),
                cool_rate: self.annealing.cool_rate.or(lower.annealing.cool_rate),
                min_temp: self.annealing.min_temp.or(lower.annealing.min_temp),
                max_stagnant: self.annealing.max_stagnant.or(lower.annealing.max_stagnant),
                seed: self.annealing.seed.or(lower.annealing.seed),
            },
            monitor: MonitorSection {
                refresh: self.monitor.refresh.or(lower.monitor.refresh),
                batch_size: self.monitor.batch_size.or(lower.monitor.batch_size),
            },
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> ConfigResult<FleetSettings> {
        let fleet = self.fleet;
        let worker = self.worker;
        let annealing = self.annealing;
        let monitor = self.monitor;

        let num_instances = fleet.num_instances.ok_or(ConfigError::Missing("num_instances"))?;
        let project = fleet.project.ok_or(ConfigError::Missing("project"))?;
        let test_scenario = fleet.test_scenario.ok_or(ConfigError::Missing("test_scenario"))?;
        let config_pool = fleet.config_pool.ok_or(ConfigError::Missing("config_pool"))?;
        let program = worker.fuzzer.ok_or(ConfigError::Missing("fuzzer"))?;

        let settings = FleetSettings {
            num_instances,
            start_idx: fleet.start_idx.unwrap_or(DEFAULT_START_IDX),
            project,
            test_scenario,
            config_pool,
            interval: Duration::from_secs(fleet.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
            shm_dir: fleet.shm_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_SHM_DIR)),
            region_size: fleet.region_size.unwrap_or(DEFAULT_REGION_SIZE),
            worker: WorkerSettings {
                program,
                args: worker.args.unwrap_or_default(),
                wall_clock_limit: match worker.wall_clock_limit.unwrap_or(DEFAULT_WALL_CLOCK_LIMIT_SECS) {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
            annealing: AnnealingSettings {
                init_temp: annealing.init_temp.unwrap_or(DEFAULT_INIT_TEMP),
                cool_rate: annealing.cool_rate.unwrap_or(DEFAULT_COOL_RATE),
                min_temp: annealing.min_temp.unwrap_or(DEFAULT_MIN_TEMP),
                max_stagnant: annealing.max_stagnant.unwrap_or(DEFAULT_MAX_STAGNANT),
                seed: annealing.seed,
            },
            monitor: MonitorSettings {
                mode: monitor.refresh.unwrap_or_default(),
                cadence: Duration::from_secs(DEFAULT_REFRESH_CADENCE_SECS),
                batch_size: monitor.batch_size.unwrap_or(DEFAULT_REFRESH_BATCH),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

// ── Resolved settings ───────────────────────────────────────────

/// Fully resolved, validated settings for a run.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub num_instances: u32,
    pub start_idx: u32,
    pub project: String,
    pub test_scenario: String,
    pub config_pool: Vec<PathBuf>,
    pub interval: Duration,
    pub shm_dir: PathBuf,
    pub region_size: u64,
    pub worker: WorkerSettings,
    pub annealing: AnnealingSettings,
    pub monitor: MonitorSettings,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: PathBuf,
    /// Arguments placed before the configuration path.
    pub args: Vec<String>,
    /// Hard wall-clock limit enforced by the `timeout` wrapper.
    pub wall_clock_limit: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnealingSettings {
    pub init_temp: f64,
    pub cool_rate: f64,
    pub min_temp: f64,
    pub max_stagnant: u32,
    pub seed: Option<u64>,
}

impl Default for AnnealingSettings {
    fn default() -> Self {
        Self {
            init_temp: DEFAULT_INIT_TEMP,
            cool_rate: DEFAULT_COOL_RATE,
            min_temp: DEFAULT_MIN_TEMP,
            max_stagnant: DEFAULT_MAX_STAGNANT,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub mode: RefreshMode,
    pub cadence: Duration,
    pub batch_size: usize,
}

impl FleetSettings {
    fn validate(&self) -> ConfigResult<()> {
        let a = &self.annealing;
        if self.num_instances == 0 {
            return Err(ConfigError::Invalid("num_instances must be at least 1".into()));
        }
        if self.config_pool.is_empty() {
            return Err(ConfigError::Invalid("config_pool must not be empty".into()));
        }
        if self.start_idx.checked_add(self.num_instances).is_none() {
            return Err(ConfigError::Invalid("start_idx + num_instances overflows".into()));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be at least 1 second".into()));
        }
        for (name, value) in [
            ("init_temp", a.init_temp),
            ("cool_rate", a.cool_rate),
            ("min_temp", a.min_temp),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be finite, got {value}")));
            }
        }
        if !(a.cool_rate > 0.0 && a.cool_rate <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "cool_rate must be in (0, 1], got {}",
                a.cool_rate
            )));
        }
        if !(a.min_temp > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "min_temp must be positive, got {}",
                a.min_temp
            )));
        }
        if a.init_temp < a.min_temp {
            return Err(ConfigError::Invalid(format!(
                "init_temp ({}) must not be below min_temp ({})",
                a.init_temp, a.min_temp
            )));
        }
        if a.max_stagnant == 0 {
            return Err(ConfigError::Invalid("max_stagnant must be at least 1".into()));
        }
        if self.monitor.batch_size == 0 {
            return Err(ConfigError::Invalid("monitor batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Widen the interval and tighten the stagnation bound for large
    /// fleets. Returns whether anything changed.
    pub fn apply_fleet_scaling(&mut self) -> bool {
        if self.num_instances < LARGE_FLEET_THRESHOLD {
            return false;
        }
        let interval = self
            .interval
            .max(Duration::from_secs(LARGE_FLEET_MIN_INTERVAL_SECS));
        let max_stagnant = self.annealing.max_stagnant.min(LARGE_FLEET_MAX_STAGNANT);
        let changed = interval != self.interval || max_stagnant != self.annealing.max_stagnant;
        self.interval = interval;
        self.annealing.max_stagnant = max_stagnant;
        changed
    }
}
