use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "netem-orchestrator", about = "Schedules network impairment scenarios")]
pub struct CliOpt {
    /// Path to the JSON file containing the topology
    #[arg(long)]
    pub topology: PathBuf,

    /// Path to the JSON file containing the scenarios
    #[arg(long)]
    pub scenarios: PathBuf,

    /// Path to a JSON file overriding the scheduler defaults
    #[arg(long)]
    pub scheduler_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the scheduler and enforce the scenarios until interrupted
    Run(RunOpt),
    /// Check the topology and scenarios without touching the data plane
    Validate(ValidateOpt),
}

#[derive(Parser, Debug, Clone)]
pub struct RunOpt {
    /// Print the `tc`, `ip` and `vtysh` commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Enforce impairments on an in-memory data plane instead of the host
    #[arg(long)]
    pub simulate: bool,

    /// The ratio of simulated data plane calls that fail with a transient error (the value must be
    /// between 0 and 1)
    #[arg(long, default_value_t = 0.0)]
    pub simulated_failure_ratio: f64,

    /// The random seed of the simulated data plane
    #[arg(long, default_value_t = 42)]
    pub data_plane_rng_seed: u64,

    /// Whether the run should be non-deterministic, i.e. using a non-constant seed for the random
    /// number generators
    #[arg(long)]
    pub non_deterministic: bool,

    /// Run every command inside the network namespace named after the node
    #[arg(long)]
    pub netns_exec: bool,

    /// Path of the JSON lines event log, stderr if absent
    #[arg(long)]
    pub event_log: Option<PathBuf>,

    /// How often the scheduler status is printed
    #[arg(long, default_value_t = 60)]
    pub status_interval_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateOpt {
    /// The number of upcoming activations printed per transient scenario
    #[arg(long, default_value_t = 5)]
    pub occurrences: usize,

    /// Also print the commands the `tc` data plane would run for each endpoint
    #[arg(long)]
    pub show_commands: bool,
}
