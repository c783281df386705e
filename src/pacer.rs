/// Turns fractional desired-units-per-tick into whole request batches.
///
/// Fractions carry over in `quota` between ticks. Only one batch may be in
/// flight until the first acknowledgement arrives, ten afterwards.
#[derive(Clone, Debug)]
pub struct RequestPacer {
    desired: f64,
    quota: f64,
    unacknowledged: u32,
    max_unacknowledged: u32,
}

pub const INITIAL_DESIRED_UNITS: f64 = 9.0;
const MIN_DESIRED_UNITS: f64 = 0.01;
const MAX_DESIRED_UNITS: f64 = 64.0;
const STEADY_MAX_UNACKNOWLEDGED: u32 = 10;

impl Default for RequestPacer {
    fn default() -> Self {
        Self {
            desired: INITIAL_DESIRED_UNITS,
            quota: 0.0,
            unacknowledged: 0,
            max_unacknowledged: 1,
        }
    }
}

impl RequestPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// One in-flight batch was answered; `desired` is the controller's latest
    /// output.
    pub fn acknowledge(&mut self, desired: f64) {
        self.unacknowledged = self.unacknowledged.saturating_sub(1);
        self.desired = if desired.is_nan() {
            MIN_DESIRED_UNITS
        } else {
            desired.clamp(MIN_DESIRED_UNITS, MAX_DESIRED_UNITS)
        };
        if self.unacknowledged == 0 {
            self.quota = 1.0;
        }
        self.max_unacknowledged = STEADY_MAX_UNACKNOWLEDGED;
    }

    /// Units to request this tick, at most `pending`.
    pub fn next_batch(&mut self, pending: u64) -> u32 {
        if self.unacknowledged >= self.max_unacknowledged {
            return 0;
        }
        let cap = self.desired.max(1.0);
        self.quota = (self.quota + self.desired).min(cap);
        if self.quota < 1.0 {
            return 0;
        }
        let size = (self.quota.floor() as u64).min(pending) as u32;
        if size > 0 {
            self.unacknowledged += 1;
            self.quota -= f64::from(size);
        }
        size
    }

    pub fn desired(&self) -> f64 {
        self.desired
    }

    pub fn quota(&self) -> f64 {
        self.quota
    }

    pub fn in_flight(&self) -> u32 {
        self.unacknowledged
    }
}
