use std::sync::Mutex;

use dashmap::DashMap;
use tracing::debug;

use crate::config::{ConfigError, ControllerConfig};
use crate::controller::{RateController, Step};

/// One controller per logical channel.
///
/// Channels never share history. Steps on the same channel are serialized by
/// the entry's mutex, so a host may drive different channels from different
/// threads.
pub struct ControllerRegistry {
    config: ControllerConfig,
    controllers: DashMap<String, Mutex<RateController>>,
}

impl ControllerRegistry {
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, controllers: DashMap::new() })
    }

    /// Steps the channel's controller, creating it on first use.
    pub fn step(&self, channel: &str, measured_cost_per_unit: f64, batches_answered: u32) -> Step {
        if let Some(entry) = self.controllers.get(channel) {
            let step = lock(&entry).step(measured_cost_per_unit, batches_answered);
            return step;
        }
        let entry = self.controllers.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel, "Creating controller");
            Mutex::new(RateController::from_validated(self.config.clone()))
        });
        let step = lock(&entry).step(measured_cost_per_unit, batches_answered);
        step
    }

    pub fn remove(&self, channel: &str) -> bool {
        self.controllers.remove(channel).is_some()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.controllers.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn clear(&self) {
        self.controllers.clear();
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// A panic while stepping leaves the ring buffer consistent, so a poisoned
// lock is still usable.
fn lock(m: &Mutex<RateController>) -> std::sync::MutexGuard<'_, RateController> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn channels_keep_separate_history() {
        let reg = ControllerRegistry::new(ControllerConfig::default()).unwrap();
        let a = reg.step("overworld", 2_000_000.0, 0);
        let b = reg.step("nether", 2_000_000.0, 0);
        assert_eq!(a, b);
        assert_eq!(a.desired_units, 9.0);

        // Second step on one channel smooths against its own first step only.
        let a2 = reg.step("overworld", 1_000_000.0, 1);
        assert_eq!(a2.average, Some(a.instantaneous));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.channels(), vec!["nether".to_string(), "overworld".to_string()]);
    }

    #[test]
    fn remove_and_clear() {
        let reg = ControllerRegistry::new(ControllerConfig::default()).unwrap();
        reg.step("a", 2_000_000.0, 0);
        reg.step("b", 2_000_000.0, 0);
        assert!(reg.remove("a"));
        assert!(!reg.remove("a"));
        assert!(!reg.contains("a"));
        assert!(reg.contains("b"));
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_channels_each_wrap_once() {
        let reg = Arc::new(ControllerRegistry::new(ControllerConfig::default()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let name = format!("channel-{i}");
                    for n in 0..10 {
                        reg.step(&name, 2_000_000.0, n);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 4);
        for name in reg.channels() {
            let entry = reg.controllers.get(&name).unwrap();
            assert_eq!(lock(&entry).write_index(), 0);
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = ControllerConfig { min_budget_per_tick: f64::NAN, ..Default::default() };
        assert!(matches!(ControllerRegistry::new(cfg), Err(ConfigError::NotPositive { .. })));
    }
}
