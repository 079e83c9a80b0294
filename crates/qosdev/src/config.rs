use std::path::PathBuf;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

#[derive(clap::Parser, Clone)]
#[clap(name = "WMM QoS Development Tool")]
#[clap(version)]
pub struct Config {
    #[clap(subcommand)]
    pub sub_command: SubCommand,
    #[clap(flatten)]
    pub additional: BaseConfig,
}

#[derive(clap::Parser, Clone)]
pub struct BaseConfig {
    /// Engine configuration file. Settings in a scenario's `[engine]` table
    /// take precedence.
    #[arg(long, env = "QOS_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    /// Minimum level of the diagnostics written to stderr.
    #[arg(long, value_enum)]
    pub(crate) log_level: Option<LogLevel>,
}

#[derive(clap::Subcommand, Clone)]
pub enum SubCommand {
    Replay(ReplayConfig),
    ShowConfig,
}

/// Replays a scenario file against a loopback transport and prints every
/// request the engine sends and every notification its flows receive.
#[derive(clap::Parser, Clone)]
pub struct ReplayConfig {
    /// Path to the scenario, in TOML.
    pub(crate) scenario: PathBuf,
    /// Answer every request as if the access point accepted it.
    #[arg(long)]
    pub(crate) auto_respond: bool,
    /// Check the engine's bookkeeping after every step and stop at the first
    /// inconsistency.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub(crate) check: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn replay_args(args: &[&str]) -> ReplayConfig {
        let argv = ["qosdev", "replay"].iter().chain(args).copied();
        match Config::try_parse_from(argv).map(|c| c.sub_command) {
            Ok(SubCommand::Replay(replay)) => replay,
            Ok(_) => panic!("parsed into another subcommand"),
            Err(err) => panic!("{err}"),
        }
    }

    #[test]
    fn check_defaults_on_and_can_be_disabled() {
        assert!(replay_args(&["roam.toml"]).check);
        assert!(!replay_args(&["--check=false", "roam.toml"]).check);
        assert!(replay_args(&["--check", "true", "roam.toml"]).check);
    }

    #[test]
    fn auto_respond_is_a_switch() {
        let replay = replay_args(&["--auto-respond", "roam.toml"]);
        assert!(replay.auto_respond);
        assert_eq!(replay.scenario, PathBuf::from("roam.toml"));
    }
}
