use crate::config::cli::{CliOpt, Command};
use crate::config::{load_monitor_config, load_trace};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod run;
mod synthetic;
mod util;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli_opt = CliOpt::parse();
    let config = load_monitor_config(cli_opt.config.as_deref())?;

    let events = match &cli_opt.command {
        Command::Replay(replay_opt) => load_trace(&replay_opt.trace)?,
        Command::Synthetic(synthetic_opt) => synthetic::generate(synthetic_opt)?,
    };

    run::run_and_report_stats(&cli_opt, config, events)
}
