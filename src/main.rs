mod cli;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::runner::{effective_config, run_config, run_simulate, run_step, run_watch};

fn init_logging(cli: &Cli) {
    let default_level = if cli.debug { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // Log lines would tear the dashboard apart.
    if matches!(cli.command, Some(Commands::Watch(_))) {
        builder.with_writer(std::io::sink).try_init().ok();
    } else {
        builder.with_writer(std::io::stderr).try_init().ok();
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = effective_config(&cli)?;
    match cli.command {
        Some(Commands::Step(args)) => run_step(config, args),
        Some(Commands::Simulate(args)) => run_simulate(config, args),
        Some(Commands::Watch(args)) => run_watch(config, args),
        Some(Commands::Config) => run_config(&config),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli) {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: invalid config or profile, 3: I/O failure, 4: malformed JSON, 1: other
    for cause in err.chain() {
        if let Some(cfg) = cause.downcast_ref::<chunkpace::ConfigError>() {
            return match cfg {
                chunkpace::ConfigError::Read { .. } => 3,
                chunkpace::ConfigError::Parse { .. } => 4,
                _ => 2,
            };
        }
        if let Some(profile) = cause.downcast_ref::<chunkpace::ProfileError>() {
            return match profile {
                chunkpace::ProfileError::Config(chunkpace::ConfigError::Read { .. }) => 3,
                chunkpace::ProfileError::Config(chunkpace::ConfigError::Parse { .. }) => 4,
                chunkpace::ProfileError::Read { .. } => 3,
                chunkpace::ProfileError::Parse { .. } => 4,
                _ => 2,
            };
        }
        if cause.is::<std::io::Error>() {
            return 3;
        }
        if cause.is::<serde_json::Error>() {
            return 4;
        }
    }
    1
}
