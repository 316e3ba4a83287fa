//! Closed-loop control of the load engines
//!
//! This module provides:
//! - Target calculation with a night window and hard ceiling
//! - The configured usage ceiling and its periodic drift
//! - The probabilistic step controller
//! - The sampling loop tying snapshots, targets and engines together

mod controller;
mod r#loop;
mod plan;
mod target;


pub use controller::{
    adjust_probability, increase_probability, AdaptiveController, ControlEvent, Decision,
};
pub use plan::{
    resolve_peak_usage, ConfigError, DriftOutcome, UsagePlan, DEFAULT_PEAK_USAGE, MIN_PEAK_USAGE,
};
pub use r#loop::{ControlLoop, ControlLoopBuilder, LoopConfig};
pub use target::{is_night, target_percent, HARD_CEILING_PERCENT};
