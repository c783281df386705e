use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use tracing::{info, warn};

use chunkpace::{
    batches_answered, ControllerConfig, CostProfile, RateController, Simulation, SimulationOptions, Step,
    TickRecord,
};

use crate::cli::{Cli, OutputFormat, SimArgs, StepArgs};
use crate::ui::dashboard::run_dashboard;

/// Config file (or defaults) with the command-line overrides applied.
pub fn effective_config(cli: &Cli) -> Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(smoothing) = cli.smoothing {
        config.smoothing = smoothing.into();
    }
    if cli.debug {
        config.debug = true;
    }
    config.validate()?;
    Ok(config)
}

/// One step per cost, one more batch answered each time; the count sticks at
/// `u32::MAX`.
fn step_series(controller: &mut RateController, costs: &[f64], first: u32) -> Vec<Step> {
    costs
        .iter()
        .enumerate()
        .map(|(i, cost)| {
            let n = first.saturating_add(u32::try_from(i).unwrap_or(u32::MAX));
            controller.step(*cost, n)
        })
        .collect()
}

pub fn run_config(config: &ControllerConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

pub fn run_step(config: ControllerConfig, args: StepArgs) -> Result<()> {
    let mut controller = RateController::new(config)?;
    let first = match args.raw_counter {
        Some(raw) => batches_answered(raw),
        None => args.batches,
    };
    let steps = step_series(&mut controller, &args.cost, first);

    let mut out = std::io::stdout().lock();
    match args.format {
        OutputFormat::Text => {
            writeln!(out, "batches\tcost_ms\tratio\tboost\tmult\tavg\tbudget_ms\traw_ms\tunits")?;
            for s in &steps {
                writeln!(
                    out,
                    "{}\t{:.2}\t{:.2}\t{:.3}\t{:.3}\t{}\t{:.2}\t{:.2}\t{:.2}",
                    s.batches_answered,
                    s.cost_per_unit / 1e6,
                    s.ratio,
                    s.boost,
                    s.multiplier,
                    s.average.map(|a| format!("{a:.3}")).unwrap_or_else(|| "-".into()),
                    s.allowed_budget / 1e6,
                    s.raw_budget / 1e6,
                    s.desired_units,
                )?;
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&steps)?)?;
        }
    }
    Ok(())
}

pub(crate) fn sim_options(args: &SimArgs) -> Result<SimulationOptions> {
    let profile = match &args.trace {
        Some(path) => CostProfile::load_trace(path)?,
        None => args.flag_profile(),
    };
    let options = SimulationOptions {
        profile,
        pending_units: args.units,
        jitter: args.jitter,
        seed: args.seed,
        cold_start_batches: args.cold_start_batches,
        cold_start_factor: args.cold_start_factor,
    };
    options.validate()?;
    Ok(options)
}

pub fn run_simulate(config: ControllerConfig, args: SimArgs) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    let options = sim_options(&args)?;
    info!(ticks = args.ticks, profile = ?options.profile, "Starting simulation");
    let mut sim = Simulation::new(config, options).context("Building simulation")?;

    let mut out = std::io::stdout().lock();
    if args.format == OutputFormat::Text {
        writeln!(out, "tick\ttrue_ms\test_ms\tbatches\tmult\tbudget_ms\tunits\treq\tans\tinflight")?;
    }
    paced_ticks(&mut sim, args.ticks, args.tick_ms, &stop_flag, |record| {
        match args.format {
            OutputFormat::Text => writeln!(
                out,
                "{}\t{:.2}\t{:.2}\t{}\t{:.3}\t{:.2}\t{:.2}\t{}\t{}\t{}",
                record.tick,
                record.true_cost / 1e6,
                record.estimated_cost / 1e6,
                record.batches_answered,
                record.multiplier,
                record.allowed_budget / 1e6,
                record.desired_units,
                record.requested,
                record.answered_units,
                record.in_flight,
            )?,
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&record)?)?,
        }
        Ok(())
    })?;

    let summary = sim.summary();
    match args.format {
        OutputFormat::Text => {
            writeln!(
                out,
                "# ticks={} requested={} answered={} mean_units={:.2} floor_ticks={} ceiling_ticks={} units/s={:.1}",
                summary.ticks,
                summary.units_requested,
                summary.units_answered,
                summary.mean_desired_units,
                summary.floor_ticks,
                summary.ceiling_ticks,
                summary.units_per_sec,
            )?;
        }
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&summary)?)?,
    }
    Ok(())
}

pub fn run_watch(config: ControllerConfig, args: SimArgs) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    let options = sim_options(&args)?;
    let config_for_ui = config.clone();
    let mut sim = Simulation::new(config, options).context("Building simulation")?;
    let (record_tx, record_rx) = channel::bounded::<TickRecord>(1024);

    // The dashboard needs a visible pace.
    let tick_ms = if args.tick_ms == 0 { 50 } else { args.tick_ms };
    let ticks = args.ticks;
    let stop_sim = stop_flag.clone();
    let sim_thread = thread::spawn(move || -> Result<()> {
        paced_ticks(&mut sim, ticks, tick_ms, &stop_sim, |record| {
            if record_tx.send(record).is_err() {
                // UI gone
                stop_sim.store(true, Ordering::Relaxed);
            }
            Ok(())
        })
    });

    let ui_result = run_dashboard(config_for_ui, record_rx, stop_flag.clone());
    stop_flag.store(true, Ordering::Relaxed);
    match sim_thread.join() {
        Ok(Err(e)) => warn!(?e, "Simulation error on shutdown"),
        Ok(Ok(())) => {}
        Err(_) => warn!("Simulation thread panicked"),
    }
    ui_result
}

/// Runs up to `ticks` ticks, sleeping so each takes `tick_ms`, until the stop
/// flag is set or the workload finishes.
fn paced_ticks<F>(sim: &mut Simulation, ticks: u64, tick_ms: u64, stop: &AtomicBool, mut emit: F) -> Result<()>
where
    F: FnMut(TickRecord) -> Result<()>,
{
    let period = Duration::from_millis(tick_ms);
    let mut next = Instant::now();
    for _ in 0..ticks {
        if stop.load(Ordering::Relaxed) || sim.is_finished() {
            break;
        }
        emit(sim.tick())?;
        if tick_ms > 0 {
            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ProfileOpt, SmoothingOpt};
    use chunkpace::SmoothingWindow;
    use clap::Parser;

    fn sim_args() -> SimArgs {
        match Cli::parse_from(["chunkpace", "simulate"]).command {
            Some(crate::cli::Commands::Simulate(args)) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let cli = Cli { config: None, smoothing: Some(SmoothingOpt::Recent), debug: true, command: None };
        let config = effective_config(&cli).unwrap();
        assert_eq!(config.smoothing, SmoothingWindow::Recent);
        assert!(config.debug);
        assert_eq!(config.target_budget_per_tick, 12_000_000.0);
    }

    #[test]
    fn step_series_counts_up_from_first() {
        let mut controller = RateController::new(ControllerConfig::default()).unwrap();
        let steps = step_series(&mut controller, &[2_000_000.0, 2_000_000.0, 2_000_000.0], 3);
        let counts: Vec<u32> = steps.iter().map(|s| s.batches_answered).collect();
        assert_eq!(counts, vec![3, 4, 5]);
    }

    #[test]
    fn step_series_saturates_at_max_batches() {
        let mut controller = RateController::new(ControllerConfig::default()).unwrap();
        let steps = step_series(&mut controller, &[2_000_000.0, 4_000_000.0], u32::MAX);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.batches_answered == u32::MAX));
        assert!(steps.iter().all(|s| s.boost == 0.0));
    }

    #[test]
    fn sim_options_reject_bad_jitter() {
        let mut args = sim_args();
        args.jitter = 2.0;
        let err = sim_options(&args).unwrap_err();
        assert!(err.downcast_ref::<chunkpace::ProfileError>().is_some());
    }

    #[test]
    fn paced_ticks_stops_when_workload_done() {
        let mut args = sim_args();
        args.profile = ProfileOpt::Constant;
        args.units = Some(20);
        let mut sim = Simulation::new(ControllerConfig::default(), sim_options(&args).unwrap()).unwrap();
        let stop = AtomicBool::new(false);
        let mut seen = 0u64;
        paced_ticks(&mut sim, 10_000, 0, &stop, |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert!(sim.is_finished());
        assert!(seen < 10_000);
        assert_eq!(sim.summary().units_answered, 20);
    }

    #[test]
    fn paced_ticks_honours_stop_flag() {
        let mut sim = Simulation::new(ControllerConfig::default(), sim_options(&sim_args()).unwrap()).unwrap();
        let stop = AtomicBool::new(true);
        paced_ticks(&mut sim, 100, 0, &stop, |_| Ok(())).unwrap();
        assert_eq!(sim.summary().ticks, 0);
    }
}
