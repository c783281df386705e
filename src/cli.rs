use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use chunkpace::{CostProfile, SmoothingWindow};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// JSON controller config; missing fields use defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the smoothing window
    #[arg(long, global = true, value_enum)]
    pub smoothing: Option<SmoothingOpt>,

    /// Log every controller step
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Step one controller over a sequence of measured costs
    Step(StepArgs),
    /// Run the channel simulation and print every tick
    Simulate(SimArgs),
    /// Run the channel simulation in a live dashboard
    Watch(SimArgs),
    /// Print the effective controller config as JSON
    Config,
}

#[derive(Args, Clone, Debug)]
pub struct StepArgs {
    /// Measured cost per unit in nanoseconds, one step each
    #[arg(long, required = true, num_args = 1..)]
    pub cost: Vec<f64>,

    /// Batches answered at the first step, incremented by one per step
    #[arg(long, default_value_t = 0, conflicts_with = "raw_counter")]
    pub batches: u32,

    /// Raw answered-batch counter instead of --batches
    #[arg(long)]
    pub raw_counter: Option<u32>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Clone, Debug)]
pub struct SimArgs {
    /// Number of ticks to simulate
    #[arg(long, default_value_t = 200)]
    pub ticks: u64,

    #[arg(long, value_enum, default_value_t = ProfileOpt::Constant)]
    pub profile: ProfileOpt,

    /// True cost per unit in nanoseconds (start of step/ramp)
    #[arg(long, default_value_t = 2_000_000.0)]
    pub cost: f64,

    /// Cost per unit after the step, or at the end of the ramp
    #[arg(long, default_value_t = 8_000_000.0)]
    pub cost_after: f64,

    /// Tick at which the step happens, or ramp length in ticks
    #[arg(long, default_value_t = 100)]
    pub at_tick: u64,

    /// JSON array of per-unit costs, replaces --profile
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Units to load; unbounded when omitted
    #[arg(long)]
    pub units: Option<u64>,

    /// Relative cost noise in [0, 1)
    #[arg(long, default_value_t = 0.0)]
    pub jitter: f64,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of initial batches that are slower
    #[arg(long, default_value_t = 0)]
    pub cold_start_batches: u32,

    /// Cost factor for the initial batches
    #[arg(long, default_value_t = 1.0)]
    pub cold_start_factor: f64,

    /// Wall-clock milliseconds per tick; 0 runs as fast as possible
    #[arg(long, default_value_t = 0)]
    pub tick_ms: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmoothingOpt {
    Leading,
    Recent,
}

impl From<SmoothingOpt> for SmoothingWindow {
    fn from(v: SmoothingOpt) -> Self {
        match v {
            SmoothingOpt::Leading => SmoothingWindow::Leading,
            SmoothingOpt::Recent => SmoothingWindow::Recent,
        }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProfileOpt {
    Constant,
    Step,
    Ramp,
}

impl SimArgs {
    /// Profile from the flags, ignoring --trace.
    pub fn flag_profile(&self) -> CostProfile {
        match self.profile {
            ProfileOpt::Constant => CostProfile::Constant { cost: self.cost },
            ProfileOpt::Step => CostProfile::Step {
                before: self.cost,
                after: self.cost_after,
                at_tick: self.at_tick,
            },
            ProfileOpt::Ramp => CostProfile::Ramp {
                from: self.cost,
                to: self.cost_after,
                over_ticks: self.at_tick,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_with_several_costs() {
        let cli = Cli::parse_from(["chunkpace", "step", "--cost", "2000000", "8000000", "--batches", "3"]);
        match cli.command {
            Some(Commands::Step(args)) => {
                assert_eq!(args.cost, vec![2_000_000.0, 8_000_000.0]);
                assert_eq!(args.batches, 3);
                assert_eq!(args.format, OutputFormat::Text);
            }
            _ => panic!("expected step"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["chunkpace", "simulate", "--profile", "ramp", "--smoothing", "recent", "--debug"]);
        assert!(cli.debug);
        assert_eq!(cli.smoothing, Some(SmoothingOpt::Recent));
        match cli.command {
            Some(Commands::Simulate(args)) => {
                assert_eq!(
                    args.flag_profile(),
                    CostProfile::Ramp { from: 2_000_000.0, to: 8_000_000.0, over_ticks: 100 }
                );
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn batches_conflicts_with_raw_counter() {
        let res = Cli::try_parse_from(["chunkpace", "step", "--cost", "1", "--batches", "1", "--raw-counter", "4"]);
        assert!(res.is_err());
    }
}
