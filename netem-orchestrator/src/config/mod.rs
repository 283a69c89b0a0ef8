use crate::config::cli::CliOpt;
use crate::config::scenario::ScenariosJson;
use crate::config::scheduler::SchedulerJson;
use crate::config::topology::TopologyJson;
use anyhow::Context;
use impairment_core::scenario::ScenarioDefinition;
use impairment_core::scheduler::SchedulerConfig;
use impairment_core::topology::Topology;
use serde::de::DeserializeOwned;
use std::path::Path;

pub mod cli;
pub mod scenario;
pub mod scheduler;
pub mod topology;

pub struct LoadedConfig {
    pub topology: Topology,
    /// Scenarios in file order, with the ones that failed to parse reported separately
    pub scenarios: Vec<anyhow::Result<ScenarioDefinition>>,
    pub scheduler: SchedulerConfig,
}

impl LoadedConfig {
    pub fn load(options: &CliOpt) -> anyhow::Result<Self> {
        let topology: TopologyJson = load_json(&options.topology)?;
        let topology = Topology::try_from(topology)?;

        let scenarios: ScenariosJson = load_json(&options.scenarios)?;
        let scenarios = scenarios
            .scenarios
            .into_iter()
            .map(ScenarioDefinition::try_from)
            .collect();

        let scheduler = match &options.scheduler_config {
            Some(path) => load_json::<SchedulerJson>(path)?.into(),
            None => SchedulerConfig::default(),
        };

        Ok(Self {
            topology,
            scenarios,
            scheduler,
        })
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}
