use std::time::Duration;

/// Answered units sampled once per tick.
///
/// Keeps an exponential moving average over roughly `horizon_ticks` ticks and
/// the lifetime mean. Rates per second are derived from the tick length, so a
/// sample never carries its own time delta.
pub struct AnsweredRate {
    tick: Duration,
    weight: f64,
    smoothed: f64,
    total_units: u64,
    ticks: u64,
}

impl AnsweredRate {
    pub fn new(tick: Duration, horizon_ticks: u32) -> Self {
        Self {
            tick,
            weight: 2.0 / (f64::from(horizon_ticks.max(1)) + 1.0),
            smoothed: 0.0,
            total_units: 0,
            ticks: 0,
        }
    }

    /// Records the units answered during one tick.
    pub fn record(&mut self, answered_units: u32) {
        let sample = f64::from(answered_units);
        // First tick seeds the average instead of decaying up from zero.
        self.smoothed = if self.ticks == 0 { sample } else { self.smoothed + self.weight * (sample - self.smoothed) };
        self.total_units = self.total_units.saturating_add(u64::from(answered_units));
        self.ticks += 1;
    }

    pub fn per_tick(&self) -> f64 {
        self.smoothed
    }

    pub fn per_sec(&self) -> f64 {
        self.smoothed / self.tick.as_secs_f64()
    }

    pub fn mean_per_tick(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.total_units as f64 / self.ticks as f64
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
