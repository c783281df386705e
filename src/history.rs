pub const HISTORY_SIZE: usize = 10;

/// Fixed ring of the last multipliers a controller computed.
///
/// Starts zero-filled. Zeroed slots take part in averages until they are
/// overwritten.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiplierHistory {
    slots: [f64; HISTORY_SIZE],
    write_index: usize,
}

impl MultiplierHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, multiplier: f64) {
        self.slots[self.write_index] = multiplier;
        self.write_index = (self.write_index + 1) % HISTORY_SIZE;
    }

    /// Mean of slots `0..min(samples, capacity)`.
    pub fn leading_average(&self, samples: usize) -> Option<f64> {
        let count = samples.min(HISTORY_SIZE);
        if count == 0 {
            return None;
        }
        Some(self.slots[..count].iter().sum::<f64>() / count as f64)
    }

    /// Mean of the `min(samples, capacity)` slots written last.
    pub fn recent_average(&self, samples: usize) -> Option<f64> {
        let count = samples.min(HISTORY_SIZE);
        if count == 0 {
            return None;
        }
        let sum: f64 = (1..=count)
            .map(|back| self.slots[(self.write_index + HISTORY_SIZE - back) % HISTORY_SIZE])
            .sum();
        Some(sum / count as f64)
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.slots
    }

    pub fn capacity(&self) -> usize {
        HISTORY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_after_capacity_writes() {
        let mut h = MultiplierHistory::new();
        for i in 0..HISTORY_SIZE {
            assert_eq!(h.write_index(), i);
            h.record(i as f64);
        }
        assert_eq!(h.write_index(), 0);
        assert_eq!(h.as_slice().len(), HISTORY_SIZE);
        h.record(42.0);
        assert_eq!(h.as_slice()[0], 42.0);
        assert_eq!(h.write_index(), 1);
    }

    #[test]
    fn leading_average_counts_zeroed_slots() {
        let mut h = MultiplierHistory::new();
        h.record(2.0);
        assert_eq!(h.leading_average(0), None);
        assert_eq!(h.leading_average(1), Some(2.0));
        assert_eq!(h.leading_average(4), Some(0.5));
        assert_eq!(h.leading_average(100), Some(0.2));
    }

    #[test]
    fn leading_average_ignores_cursor_after_wrap() {
        let mut h = MultiplierHistory::new();
        for _ in 0..HISTORY_SIZE {
            h.record(1.0);
        }
        // Slots 0..3 get overwritten, the window still starts at slot 0.
        for _ in 0..3 {
            h.record(4.0);
        }
        assert_eq!(h.leading_average(3), Some(4.0));
        assert_eq!(h.leading_average(5), Some((3.0 * 4.0 + 2.0) / 5.0));
    }

    #[test]
    fn recent_average_walks_back_from_cursor() {
        let mut h = MultiplierHistory::new();
        for _ in 0..HISTORY_SIZE {
            h.record(1.0);
        }
        h.record(3.0);
        h.record(5.0);
        assert_eq!(h.recent_average(2), Some(4.0));
        assert_eq!(h.recent_average(3), Some(3.0));
        assert_eq!(h.recent_average(0), None);
    }
}
