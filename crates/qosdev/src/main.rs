use clap::Parser;
use wmm_qos::QosConfig;

mod config;
mod loopback;
mod scenario;

use crate::{
    config::{BaseConfig, Config, ReplayConfig, SubCommand},
    scenario::{Replay, Scenario},
};

fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();
    wmm_qos::config::set_logger(config.additional.log_level.map(Into::into));
    match config.sub_command {
        SubCommand::Replay(replay_config) => replay(replay_config, &config.additional),
        SubCommand::ShowConfig => {
            let engine = engine_config(&config.additional)?;
            print!("{}", toml::to_string_pretty(&engine)?);
            Ok(())
        }
    }
}

fn engine_config(base: &BaseConfig) -> anyhow::Result<QosConfig> {
    match &base.config {
        Some(path) => QosConfig::load(path),
        None => Ok(QosConfig::default()),
    }
}

fn replay(replay_config: ReplayConfig, base: &BaseConfig) -> anyhow::Result<()> {
    let scenario = Scenario::load(&replay_config.scenario)?;
    let engine = match scenario.engine {
        Some(engine) => engine,
        None => engine_config(base)?,
    };
    tracing::info!(
        scenario = %replay_config.scenario.display(),
        steps = scenario.steps.len(),
        auto_respond = replay_config.auto_respond,
        "replaying scenario"
    );
    let summary = Replay::new(engine, replay_config.auto_respond, replay_config.check)
        .run(&scenario.steps)?;
    println!(
        "{} steps, {} notifications, {} requests refused",
        summary.steps, summary.notifications, summary.rejected_requests
    );
    Ok(())
}
