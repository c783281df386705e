//! Deterministic model of a client loading chunks over a shared channel.
//!
//! The client keeps a [`CostEstimator`], steps a [`RateController`] once per
//! tick and hands the result to a [`RequestPacer`]. The channel answers a
//! batch after `units * cost_per_unit` nanoseconds, rounded up to whole
//! ticks, where the true cost follows a [`CostProfile`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, ControllerConfig};
use crate::controller::RateController;
use crate::estimator::CostEstimator;
use crate::metrics::AnsweredRate;
use crate::pacer::RequestPacer;

pub const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cost per unit must be a positive finite number, got {0}")]
    NotPositive(f64),
    #[error("trace contains no costs")]
    EmptyTrace,
    #[error("jitter must be within [0, 1), got {0}")]
    Jitter(f64),
    #[error("cold start factor must be >= 1, got {0}")]
    ColdStartFactor(f64),
    #[error("reading trace {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing trace {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid controller config")]
    Config(#[from] ConfigError),
}

/// True nanoseconds per unit the channel needs, by tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CostProfile {
    Constant { cost: f64 },
    Step { before: f64, after: f64, at_tick: u64 },
    Ramp { from: f64, to: f64, over_ticks: u64 },
    /// Cycled once exhausted.
    Trace { costs: Vec<f64> },
}

impl CostProfile {
    /// Reads a JSON array of per-unit costs.
    pub fn load_trace(path: &Path) -> Result<Self, ProfileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let costs: Vec<f64> = serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = CostProfile::Trace { costs };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let check = |v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ProfileError::NotPositive(v))
            }
        };
        match self {
            CostProfile::Constant { cost } => check(*cost),
            CostProfile::Step { before, after, .. } => check(*before).and(check(*after)),
            CostProfile::Ramp { from, to, .. } => check(*from).and(check(*to)),
            CostProfile::Trace { costs } => {
                if costs.is_empty() {
                    return Err(ProfileError::EmptyTrace);
                }
                costs.iter().try_for_each(|c| check(*c))
            }
        }
    }

    pub fn cost_at(&self, tick: u64) -> f64 {
        match self {
            CostProfile::Constant { cost } => *cost,
            CostProfile::Step { before, after, at_tick } => {
                if tick < *at_tick {
                    *before
                } else {
                    *after
                }
            }
            CostProfile::Ramp { from, to, over_ticks } => {
                if *over_ticks == 0 {
                    return *to;
                }
                let progress = tick.min(*over_ticks) as f64 / *over_ticks as f64;
                from + (to - from) * progress
            }
            CostProfile::Trace { costs } => costs[(tick % costs.len() as u64) as usize],
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub profile: CostProfile,
    /// Units left to load; `None` keeps requesting forever.
    pub pending_units: Option<u64>,
    /// Uniform relative noise on the true cost of each batch.
    pub jitter: f64,
    pub seed: u64,
    /// The first batches issued cost `cold_start_factor` times more.
    pub cold_start_batches: u32,
    pub cold_start_factor: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            profile: CostProfile::Constant { cost: 2_000_000.0 },
            pending_units: None,
            jitter: 0.0,
            seed: 0,
            cold_start_batches: 0,
            cold_start_factor: 1.0,
        }
    }
}

impl SimulationOptions {
    pub fn validate(&self) -> Result<(), ProfileError> {
        self.profile.validate()?;
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ProfileError::Jitter(self.jitter));
        }
        if !(self.cold_start_factor.is_finite() && self.cold_start_factor >= 1.0) {
            return Err(ProfileError::ColdStartFactor(self.cold_start_factor));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickRecord {
    pub tick: u64,
    pub true_cost: f64,
    pub estimated_cost: f64,
    pub batches_answered: u32,
    pub ratio: f64,
    pub boost: f64,
    pub multiplier: f64,
    pub average: Option<f64>,
    pub raw_budget: f64,
    pub allowed_budget: f64,
    pub desired_units: f64,
    pub requested: u32,
    pub answered_units: u32,
    pub in_flight: u32,
    pub pending: Option<u64>,
    pub history: Vec<f64>,
    pub write_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub ticks: u64,
    pub units_requested: u64,
    pub units_answered: u64,
    pub mean_desired_units: f64,
    pub floor_ticks: u64,
    pub ceiling_ticks: u64,
    pub units_per_sec: f64,
}

struct InFlight {
    size: u32,
    elapsed: Duration,
    due: u64,
}

pub struct Simulation {
    options: SimulationOptions,
    controller: RateController,
    estimator: CostEstimator,
    pacer: RequestPacer,
    in_flight: Vec<InFlight>,
    rng: StdRng,
    tick: u64,
    pending: Option<u64>,
    batches_issued: u32,
    units_requested: u64,
    units_answered: u64,
    desired_sum: f64,
    floor_ticks: u64,
    ceiling_ticks: u64,
    throughput: AnsweredRate,
}

impl Simulation {
    pub fn new(config: ControllerConfig, options: SimulationOptions) -> Result<Self, ProfileError> {
        options.validate()?;
        Ok(Self {
            controller: RateController::new(config)?,
            estimator: CostEstimator::new(),
            pacer: RequestPacer::new(),
            in_flight: Vec::new(),
            rng: StdRng::seed_from_u64(options.seed),
            tick: 0,
            pending: options.pending_units,
            batches_issued: 0,
            units_requested: 0,
            units_answered: 0,
            desired_sum: 0.0,
            floor_ticks: 0,
            ceiling_ticks: 0,
            throughput: AnsweredRate::new(TICK, 20),
            options,
        })
    }

    pub fn controller(&self) -> &RateController {
        &self.controller
    }

    /// All requested units have been answered.
    pub fn is_finished(&self) -> bool {
        self.pending == Some(0) && self.in_flight.is_empty()
    }

    pub fn tick(&mut self) -> TickRecord {
        let now = self.tick;

        let (answered, waiting): (Vec<InFlight>, Vec<InFlight>) =
            std::mem::take(&mut self.in_flight).into_iter().partition(|b| b.due <= now);
        self.in_flight = waiting;
        let mut answered_units = 0u32;
        for batch in &answered {
            self.estimator.record_batch(batch.elapsed, batch.size);
            answered_units += batch.size;
        }

        let step = self.controller.step(self.estimator.cost_per_unit(), self.estimator.batches_answered());
        for _ in &answered {
            self.pacer.acknowledge(step.desired_units);
        }

        let true_cost = self.true_cost(now);
        let requested = self.pacer.next_batch(self.pending.unwrap_or(u64::MAX));
        if requested > 0 {
            let cost = if self.batches_issued < self.options.cold_start_batches {
                true_cost * self.options.cold_start_factor
            } else {
                true_cost
            };
            let elapsed_nanos = cost * f64::from(requested);
            let ticks = (elapsed_nanos / TICK.as_nanos() as f64).ceil().max(1.0) as u64;
            let due = now.saturating_add(ticks);
            self.in_flight.push(InFlight { size: requested, elapsed: Duration::from_nanos(elapsed_nanos as u64), due });
            self.batches_issued += 1;
            if let Some(p) = self.pending.as_mut() {
                *p -= u64::from(requested);
            }
            debug!(tick = now, requested, due, "Issued batch");
        }

        let config = self.controller.config();
        if step.allowed_budget <= config.min_budget_per_tick {
            self.floor_ticks += 1;
        }
        if step.allowed_budget >= config.max_budget_per_tick {
            self.ceiling_ticks += 1;
        }
        self.units_requested += u64::from(requested);
        self.units_answered += u64::from(answered_units);
        self.desired_sum += step.desired_units;
        self.throughput.record(answered_units);
        self.tick += 1;

        TickRecord {
            tick: now,
            true_cost,
            estimated_cost: step.cost_per_unit,
            batches_answered: step.batches_answered,
            ratio: step.ratio,
            boost: step.boost,
            multiplier: step.multiplier,
            average: step.average,
            raw_budget: step.raw_budget,
            allowed_budget: step.allowed_budget,
            desired_units: step.desired_units,
            requested,
            answered_units,
            in_flight: self.pacer.in_flight(),
            pending: self.pending,
            history: self.controller.history().to_vec(),
            write_index: self.controller.write_index(),
        }
    }

    pub fn run(&mut self, ticks: u64) -> Vec<TickRecord> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            ticks: self.tick,
            units_requested: self.units_requested,
            units_answered: self.units_answered,
            mean_desired_units: if self.tick == 0 { 0.0 } else { self.desired_sum / self.tick as f64 },
            floor_ticks: self.floor_ticks,
            ceiling_ticks: self.ceiling_ticks,
            units_per_sec: self.throughput.per_sec(),
        }
    }

    fn true_cost(&mut self, tick: u64) -> f64 {
        let base = self.options.profile.cost_at(tick);
        if self.options.jitter > 0.0 {
            let j = self.options.jitter;
            base * (1.0 + self.rng.random_range(-j..=j))
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn constant(cost: f64) -> SimulationOptions {
        SimulationOptions { profile: CostProfile::Constant { cost }, ..Default::default() }
    }

    #[test]
    fn first_tick_at_target_cost() {
        let mut sim = Simulation::new(ControllerConfig::default(), constant(2_000_000.0)).unwrap();
        let r = sim.tick();
        assert_eq!(r.tick, 0);
        assert_eq!(r.desired_units, 9.0);
        assert_eq!(r.requested, 9);
        assert_eq!(r.answered_units, 0);
        assert_eq!(r.in_flight, 1);

        // 9 units at 2ms fit in one tick.
        let r = sim.tick();
        assert_eq!(r.answered_units, 9);
        assert_eq!(r.estimated_cost, 2_000_000.0);
    }

    #[test]
    fn same_seed_gives_same_run() {
        let opts = SimulationOptions {
            jitter: 0.3,
            seed: 7,
            cold_start_batches: 3,
            cold_start_factor: 4.0,
            ..constant(2_500_000.0)
        };
        let a = Simulation::new(ControllerConfig::default(), opts.clone()).unwrap().run(200);
        let b = Simulation::new(ControllerConfig::default(), opts).unwrap().run(200);
        assert_eq!(a, b);
    }

    #[test]
    fn slow_channel_is_throttled_harder() {
        let mut fast = Simulation::new(ControllerConfig::default(), constant(1_000_000.0)).unwrap();
        let mut slow = Simulation::new(ControllerConfig::default(), constant(8_000_000.0)).unwrap();
        fast.run(400);
        let slow_records = slow.run(400);

        let fast_summary = fast.summary();
        let slow_summary = slow.summary();
        assert!(slow_summary.mean_desired_units < fast_summary.mean_desired_units);
        assert!(slow_summary.units_answered < fast_summary.units_answered);
        // Once warmed up, the slow channel sits at the budget floor.
        let last = slow_records.last().unwrap();
        assert_eq!(last.allowed_budget, 7_000_000.0);
        assert!(slow_summary.floor_ticks > 0);
    }

    #[test]
    fn finite_workload_completes() {
        let opts = SimulationOptions { pending_units: Some(100), ..constant(2_000_000.0) };
        let mut sim = Simulation::new(ControllerConfig::default(), opts).unwrap();
        let mut ticks = 0;
        while !sim.is_finished() && ticks < 1_000 {
            sim.tick();
            ticks += 1;
        }
        assert!(sim.is_finished());
        let summary = sim.summary();
        assert_eq!(summary.units_requested, 100);
        assert_eq!(summary.units_answered, 100);
    }

    #[test]
    fn history_in_records_tracks_controller() {
        let mut sim = Simulation::new(ControllerConfig::default(), constant(2_000_000.0)).unwrap();
        let records = sim.run(12);
        assert_eq!(records[9].write_index, 0);
        assert_eq!(records[11].write_index, 2);
        assert_eq!(records[11].history, sim.controller().history().to_vec());
    }

    #[test]
    fn profile_costs_by_tick() {
        let step = CostProfile::Step { before: 1.0, after: 5.0, at_tick: 10 };
        assert_eq!(step.cost_at(9), 1.0);
        assert_eq!(step.cost_at(10), 5.0);

        let ramp = CostProfile::Ramp { from: 2.0, to: 4.0, over_ticks: 4 };
        assert_eq!(ramp.cost_at(0), 2.0);
        assert_eq!(ramp.cost_at(2), 3.0);
        assert_eq!(ramp.cost_at(100), 4.0);

        let trace = CostProfile::Trace { costs: vec![1.0, 2.0, 3.0] };
        assert_eq!(trace.cost_at(4), 2.0);
    }

    #[test]
    fn rejects_bad_options() {
        let bad = constant(0.0);
        assert!(matches!(bad.validate(), Err(ProfileError::NotPositive(_))));
        let bad = SimulationOptions { jitter: 1.0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ProfileError::Jitter(_))));
        let bad = SimulationOptions { cold_start_factor: 0.5, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ProfileError::ColdStartFactor(_))));
        let bad = SimulationOptions { profile: CostProfile::Trace { costs: vec![] }, ..Default::default() };
        assert!(matches!(bad.validate(), Err(ProfileError::EmptyTrace)));
    }

    #[test]
    fn loads_trace_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1500000.0, 3000000.0]").unwrap();
        let profile = CostProfile::load_trace(file.path()).unwrap();
        assert_eq!(profile, CostProfile::Trace { costs: vec![1_500_000.0, 3_000_000.0] });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1.0, -2.0]").unwrap();
        assert!(matches!(CostProfile::load_trace(file.path()), Err(ProfileError::NotPositive(_))));
    }

    #[test]
    fn profile_round_trips_through_json() {
        let profile: CostProfile =
            serde_json::from_str(r#"{"kind": "step", "before": 1000000.0, "after": 4000000.0, "at_tick": 20}"#)
                .unwrap();
        assert_eq!(profile, CostProfile::Step { before: 1_000_000.0, after: 4_000_000.0, at_tick: 20 });
    }

    #[test]
    fn huge_cost_does_not_overflow_due_tick() {
        let options = SimulationOptions {
            profile: CostProfile::Step { before: 2_000_000.0, after: 1e300, at_tick: 5 },
            ..Default::default()
        };
        let mut sim = Simulation::new(ControllerConfig::default(), options).unwrap();
        let records = sim.run(20);
        assert_eq!(records.len(), 20);
        // The batch issued after the step is never answered.
        assert!(records[19].in_flight >= 1);
        assert!(records.iter().all(|r| r.allowed_budget.is_finite()));
    }

    #[test]
    fn rejects_invalid_controller_config() {
        let config = ControllerConfig { target_budget_per_tick: 1e9, ..Default::default() };
        assert!(matches!(
            Simulation::new(config, SimulationOptions::default()),
            Err(ProfileError::Config(ConfigError::BudgetOrder { .. }))
        ));
    }
}
