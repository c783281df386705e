//! Adaptive pacing of chunk-load requests.
//!
//! [`RateController`] decides, once per tick, how much time chunk loading may
//! take and how many chunks that buys, from the caller's measured cost per
//! chunk and the number of answered batches. [`CostEstimator`] and
//! [`RequestPacer`] are the caller-side pieces around it, and [`Simulation`]
//! drives all three against a modelled channel.

pub mod config;
pub mod controller;
pub mod estimator;
pub mod history;
pub mod metrics;
pub mod pacer;
pub mod registry;
pub mod sim;

pub use config::{ConfigError, ControllerConfig, SmoothingWindow};
pub use controller::{batches_answered, RateController, Step};
pub use estimator::CostEstimator;
pub use history::{MultiplierHistory, HISTORY_SIZE};
pub use pacer::RequestPacer;
pub use registry::ControllerRegistry;
pub use sim::{CostProfile, ProfileError, Simulation, SimulationOptions, Summary, TickRecord};
