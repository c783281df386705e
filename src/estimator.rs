use std::time::Duration;

use crate::controller::batches_answered;

pub const INITIAL_COST_PER_UNIT: f64 = 2_000_000.0;
const MAX_OLD_SAMPLES_WEIGHT: u32 = 49;
const SAMPLE_CLAMP_FACTOR: f64 = 3.0;

/// Running average of nanoseconds per unit over answered batches.
///
/// A new sample can move the estimate by at most a factor of three, and old
/// samples never weigh more than 49 new ones.
#[derive(Clone, Debug)]
pub struct CostEstimator {
    aggregated: f64,
    old_samples_weight: u32,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self { aggregated: INITIAL_COST_PER_UNIT, old_samples_weight: 1 }
    }
}

impl CostEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&mut self, elapsed: Duration, batch_size: u32) {
        if batch_size == 0 {
            return;
        }
        let per_unit = elapsed.as_nanos() as f64 / f64::from(batch_size);
        let sample = per_unit.clamp(
            self.aggregated / SAMPLE_CLAMP_FACTOR,
            self.aggregated * SAMPLE_CLAMP_FACTOR,
        );
        let weight = f64::from(self.old_samples_weight);
        self.aggregated = (self.aggregated * weight + sample) / (weight + 1.0);
        self.old_samples_weight = (self.old_samples_weight + 1).min(MAX_OLD_SAMPLES_WEIGHT);
    }

    pub fn cost_per_unit(&self) -> f64 {
        self.aggregated
    }

    pub fn raw_answered(&self) -> u32 {
        self.old_samples_weight
    }

    pub fn batches_answered(&self) -> u32 {
        batches_answered(self.old_samples_weight)
    }
}
