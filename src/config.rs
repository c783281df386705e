use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Which slots of the multiplier history feed the smoothing average.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingWindow {
    /// Average from slot 0 up to `min(capacity, batches_answered)`, regardless
    /// of where the write cursor is.
    #[default]
    Leading,
    /// Average the most recently written slots. Changes behavior once the
    /// history has wrapped.
    Recent,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a positive finite number, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("budgets must satisfy min <= target <= max, got min={min} target={target} max={max}")]
    BudgetOrder { min: f64, target: f64, max: f64 },
    #[error("reading config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Constants of one controller. All times are nanoseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub target_cost_per_unit: f64,
    pub target_budget_per_tick: f64,
    pub min_budget_per_tick: f64,
    pub max_budget_per_tick: f64,
    /// Floor substituted for measured costs that are not positive.
    pub min_cost_per_unit: f64,
    pub smoothing: SmoothingWindow,
    /// Log every step's intermediate values at info level.
    pub debug: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_cost_per_unit: 2.0 * NANOS_PER_MILLI,
            target_budget_per_tick: 12.0 * NANOS_PER_MILLI,
            min_budget_per_tick: 7.0 * NANOS_PER_MILLI,
            max_budget_per_tick: 35.0 * NANOS_PER_MILLI,
            min_cost_per_unit: 1.0,
            smoothing: SmoothingWindow::Leading,
            debug: false,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("target_cost_per_unit", self.target_cost_per_unit),
            ("target_budget_per_tick", self.target_budget_per_tick),
            ("min_budget_per_tick", self.min_budget_per_tick),
            ("max_budget_per_tick", self.max_budget_per_tick),
            ("min_cost_per_unit", self.min_cost_per_unit),
        ];
        for (field, value) in fields {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        if !(self.min_budget_per_tick <= self.target_budget_per_tick
            && self.target_budget_per_tick <= self.max_budget_per_tick)
        {
            return Err(ConfigError::BudgetOrder {
                min: self.min_budget_per_tick,
                target: self.target_budget_per_tick,
                max: self.max_budget_per_tick,
            });
        }
        Ok(())
    }
}

pub(crate) fn nanos_to_millis(nanos: f64) -> f64 {
    nanos / NANOS_PER_MILLI
}
