//! Per-tick chunk-load budget controller.
//!
//! Each step turns the caller's running cost-per-chunk estimate into a time
//! budget for chunk loading and the number of chunks that budget buys. A
//! slower channel gets a smaller budget, not a larger one: the bandwidth left
//! over goes to traffic that cannot be throttled. The first few answered
//! batches get an additive boost so joining loads nearby chunks quickly.
//!
//! The controller is stateful only through its [`MultiplierHistory`]; every
//! call advances that history, so call it exactly once per tick.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{nanos_to_millis, ConfigError, ControllerConfig, SmoothingWindow};
use crate::history::MultiplierHistory;

pub const WARMUP_BATCH_THRESHOLD: u32 = 8;
const WARMUP_DIVISOR: f64 = 16.0;

/// `ratio * (log10(ratio) + 1)`: faster than linear, slower than squared.
pub fn shape_multiplier(ratio: f64) -> f64 {
    ratio * (ratio.log10() + 1.0)
}

/// Additive boost for the warm-up window, 0.5 at zero answered batches down
/// to 0 at the threshold.
pub fn warmup_boost(batches_answered: u32) -> f64 {
    if batches_answered < WARMUP_BATCH_THRESHOLD {
        f64::from(WARMUP_BATCH_THRESHOLD - batches_answered) / WARMUP_DIVISOR
    } else {
        0.0
    }
}

/// The caller's answered-batch counter starts at 1 and is bumped on the first
/// answer, so the first two values mean "nothing answered yet".
pub fn batches_answered(raw_counter: u32) -> u32 {
    raw_counter.saturating_sub(2)
}

/// Every intermediate value of one controller step.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Step {
    /// Cost actually used, after the floor was applied.
    pub cost_per_unit: f64,
    pub batches_answered: u32,
    pub ratio: f64,
    pub shaped: f64,
    pub boost: f64,
    /// Multiplier written into the history.
    pub instantaneous: f64,
    pub average: Option<f64>,
    pub multiplier: f64,
    pub raw_budget: f64,
    pub allowed_budget: f64,
    pub desired_units: f64,
}

#[derive(Clone, Debug)]
pub struct RateController {
    config: ControllerConfig,
    history: MultiplierHistory,
}

impl RateController {
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    /// Skips validation; `config` must already have passed
    /// [`ControllerConfig::validate`], otherwise the budget clamp can panic.
    pub(crate) fn from_validated(config: ControllerConfig) -> Self {
        Self { config, history: MultiplierHistory::new() }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn history(&self) -> &[f64] {
        self.history.as_slice()
    }

    pub fn write_index(&self) -> usize {
        self.history.write_index()
    }

    /// Time budget for chunk loading this tick, in the config's time unit.
    pub fn compute_allowed_budget(&mut self, measured_cost_per_unit: f64, batches_answered: u32) -> f64 {
        self.step(measured_cost_per_unit, batches_answered).allowed_budget
    }

    /// Chunks to request this tick. Fractional and not clamped to what is
    /// actually available.
    pub fn compute_desired_units_per_tick(&mut self, measured_cost_per_unit: f64, batches_answered: u32) -> f64 {
        self.step(measured_cost_per_unit, batches_answered).desired_units
    }

    pub fn step(&mut self, measured_cost_per_unit: f64, batches_answered: u32) -> Step {
        let cost = self.effective_cost(measured_cost_per_unit);
        let ratio = self.config.target_cost_per_unit / cost;
        let shaped = shape_multiplier(ratio);
        let boost = warmup_boost(batches_answered);
        let instantaneous = shaped + boost;

        self.history.record(instantaneous);

        let average = if batches_answered > 0 {
            let samples = batches_answered as usize;
            match self.config.smoothing {
                SmoothingWindow::Leading => self.history.leading_average(samples),
                SmoothingWindow::Recent => self.history.recent_average(samples),
            }
        } else {
            None
        };
        let multiplier = match average {
            Some(avg) => {
                if self.config.debug {
                    info!(multiplier = instantaneous, average = avg, "Calculated multiplier");
                }
                instantaneous.min(avg)
            }
            None => instantaneous,
        };

        let raw_budget = self.config.target_budget_per_tick * multiplier;
        let allowed_budget = raw_budget.clamp(self.config.min_budget_per_tick, self.config.max_budget_per_tick);
        let desired_units = allowed_budget / cost;

        if self.config.debug {
            info!(
                ms_per_unit = %format!("{:.2}", nanos_to_millis(cost)),
                ratio = %format!("{ratio:.2}"),
                multiplier = %format!("{multiplier:.2}"),
                allowed_ms = %format!("{:.2}", nanos_to_millis(allowed_budget)),
                raw_ms = %format!("{:.2}", nanos_to_millis(raw_budget)),
                desired_units,
                "Chunk budget"
            );
        }

        Step {
            cost_per_unit: cost,
            batches_answered,
            ratio,
            shaped,
            boost,
            instantaneous,
            average,
            multiplier,
            raw_budget,
            allowed_budget,
            desired_units,
        }
    }

    fn effective_cost(&self, measured: f64) -> f64 {
        let floor = self.config.min_cost_per_unit;
        if measured == f64::INFINITY {
            warn!("Measured cost per unit is infinite, using f64::MAX");
            f64::MAX
        } else if measured >= floor {
            measured
        } else {
            // Also catches NaN.
            warn!(measured, floor, "Measured cost per unit below floor, clamping");
            floor
        }
    }
}
