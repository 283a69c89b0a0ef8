use crate::config::LoadedConfig;
use crate::config::cli::{CliOpt, Command};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod run;
mod util;
mod validate;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = CliOpt::parse();
    let config = LoadedConfig::load(&options)?;

    match &options.command {
        Command::Run(run_options) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to initialize tokio")?;
            rt.block_on(run::run(&options, run_options, config))
        }
        Command::Validate(validate_options) => validate::validate(validate_options, config),
    }
}
