//! coverfleetd — the coverfleet daemon.
//!
//! Single binary that assembles the fleet:
//! - Resource pool (worker slots + shared-memory regions)
//! - Coverage monitor (inline or background refresh)
//! - Simulated-annealing scheduler
//!
//! # Usage
//!
//! ```text
//! coverfleetd -n 8 -f /opt/fuzz/pfuzz -p dnsmasq -t dhcp -c cfg/a.xml cfg/b-heavy.xml
//! coverfleetd --config fleet.toml -n 64
//! ```

mod driver;
mod report;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use coverfleet_core::{FleetFile, FleetSettings, RefreshMode};

#[derive(Parser, Debug)]
#[command(
    name = "coverfleetd",
    about = "Coverage-driven fuzz fleet scheduler",
    version
)]
struct Cli {
    /// TOML file with [fleet], [worker], [annealing] and [monitor] tables.
    /// Flags given on the command line take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker slots.
    #[arg(short = 'n', long)]
    num_instances: Option<u32>,

    /// Worker (fuzzer) executable.
    #[arg(short, long)]
    fuzzer: Option<PathBuf>,

    /// Project name; prefixes every shared-memory region.
    #[arg(short, long)]
    project: Option<String>,

    /// Test scenario name, shown in the banner.
    #[arg(short, long)]
    test_scenario: Option<String>,

    /// Candidate configuration files.
    #[arg(short = 'c', long, num_args = 1..)]
    config_pool: Option<Vec<PathBuf>>,

    /// Id of the first slot [default: 1].
    #[arg(short, long)]
    start_idx: Option<u32>,

    /// Seconds between scheduler steps [default: 60].
    #[arg(short, long)]
    interval: Option<u64>,

    /// Initial (and reheat) temperature [default: 1000.0].
    #[arg(long)]
    init_temp: Option<f64>,

    /// Multiplicative cooling per step [default: 0.95].
    #[arg(long)]
    cool_rate: Option<f64>,

    /// Temperature floor [default: 1.0].
    #[arg(long)]
    min_temp: Option<f64>,

    /// Non-improving steps before a reheat [default: 20].
    #[arg(long)]
    max_stagnant: Option<u32>,

    /// Extra argument passed to every worker before the configuration path.
    /// Repeatable.
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// Directory holding the shared-memory regions [default: /dev/shm].
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Size of every region in bytes [default: 10 MiB].
    #[arg(long)]
    region_size: Option<u64>,

    /// Hard wall-clock limit per worker in seconds; 0 disables it
    /// [default: 86400].
    #[arg(long)]
    wall_clock_limit: Option<u64>,

    /// Coverage refresh mode: inline or background [default: inline].
    #[arg(long)]
    refresh: Option<RefreshMode>,

    /// RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    /// Resolve flags on top of the optional config file.
    fn settings(self) -> anyhow::Result<FleetSettings> {
        let lower = match &self.config {
            Some(path) => FleetFile::from_file(path)?,
            None => FleetFile::default(),
        };

        let mut upper = FleetFile::default();
        upper.fleet.num_instances = self.num_instances;
        upper.fleet.start_idx = self.start_idx;
        upper.fleet.project = self.project;
        upper.fleet.test_scenario = self.test_scenario;
        upper.fleet.config_pool = self.config_pool;
        upper.fleet.interval = self.interval;
        upper.fleet.shm_dir = self.shm_dir;
        upper.fleet.region_size = self.region_size;
        upper.worker.fuzzer = self.fuzzer;
        upper.worker.args = (!self.worker_args.is_empty()).then_some(self.worker_args);
        upper.worker.wall_clock_limit = self.wall_clock_limit;
        upper.annealing.init_temp = self.init_temp;
        upper.annealing.cool_rate = self.cool_rate;
        upper.annealing.min_temp = self.min_temp;
        upper.annealing.max_stagnant = self.max_stagnant;
        upper.annealing.seed = self.seed;
        upper.monitor.refresh = self.refresh;

        Ok(upper.overlay(lower).resolve()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,coverfleetd=debug,coverfleet=debug")
            }),
        )
        .init();

    let mut settings = Cli::parse().settings()?;
    if settings.apply_fleet_scaling() {
        info!(
            slots = settings.num_instances,
            interval_secs = settings.interval.as_secs(),
            max_stagnant = settings.annealing.max_stagnant,
            "large fleet: widened interval and tightened stagnation bound"
        );
    }

    driver::run(settings).await
}
