//! Probabilistic step controller
//!
//! Each pass decides for one resource whether to act at all and, if so,
//! whether to step its load engine up or down. Both decisions are biased
//! coin flips whose odds grow with the distance to the target, so usage
//! drifts toward the target without tracking it exactly.

use super::target::HARD_CEILING_PERCENT;
use crate::engine::LoadEngine;
use crate::models::Resource;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

/// Outcome of one controller pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Usage above the hard ceiling; stepped down without drawing
    Forced,
    /// The adjust-or-skip draw chose to leave the engine alone
    Skip,
    /// Stepped in the drawn direction
    Adjust {
        increase_probability: f64,
        increase: bool,
    },
}

impl Decision {
    pub fn category(&self) -> &'static str {
        match self {
            Decision::Forced => "forced",
            Decision::Skip => "skip",
            Decision::Adjust { .. } => "adjust",
        }
    }

    /// Direction stepped, or `None` when skipped
    pub fn direction(&self) -> Option<bool> {
        match self {
            Decision::Forced => Some(false),
            Decision::Skip => None,
            Decision::Adjust { increase, .. } => Some(*increase),
        }
    }
}

/// Observable result of one pass for one resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlEvent {
    pub resource: Resource,
    pub measured_percent: f64,
    pub target_percent: f64,
    #[serde(flatten)]
    pub decision: Decision,
    /// Engine level after the step; `None` when skipped
    pub level: Option<u64>,
}

/// Probability of acting at all for a given distance from target
pub fn adjust_probability(abs_diff: f64) -> f64 {
    if abs_diff > 5.0 {
        0.90
    } else if abs_diff >= 2.0 {
        0.70
    } else {
        0.60
    }
}

/// Probability of stepping up, given `diff = measured - target`
pub fn increase_probability(diff: f64) -> f64 {
    let distance = diff.abs();
    if diff < 0.0 {
        if distance > 50.0 {
            0.90
        } else if distance > 20.0 {
            0.80
        } else if distance > 10.0 {
            0.70
        } else if distance > 5.0 {
            0.65
        } else if distance >= 2.0 {
            0.60
        } else {
            0.55
        }
    } else if distance > 50.0 {
        0.10
    } else if distance > 20.0 {
        0.20
    } else if distance > 10.0 {
        0.30
    } else if distance > 5.0 {
        0.35
    } else if distance >= 2.0 {
        0.40
    } else {
        0.45
    }
}

/// Controller holding only its random source
pub struct AdaptiveController<R = StdRng> {
    rng: R,
}

impl AdaptiveController<StdRng> {
    /// Controller seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for AdaptiveController<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> AdaptiveController<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Decide what to do for a measured usage and target, without acting
    pub fn decide(&mut self, measured: f64, target: f64) -> Decision {
        if measured > HARD_CEILING_PERCENT {
            return Decision::Forced;
        }

        let diff = measured - target;
        if self.rng.gen::<f64>() >= adjust_probability(diff.abs()) {
            return Decision::Skip;
        }

        let increase_probability = increase_probability(diff);
        let increase = self.rng.gen::<f64>() < increase_probability;
        Decision::Adjust {
            increase_probability,
            increase,
        }
    }

    /// Decide and apply at most one step to `engine`
    pub fn run_pass(
        &mut self,
        engine: &dyn LoadEngine,
        measured: f64,
        target: f64,
    ) -> ControlEvent {
        let decision = self.decide(measured, target);
        let level = decision.direction().map(|increase| engine.step(increase));

        ControlEvent {
            resource: engine.resource(),
            measured_percent: measured,
            target_percent: target,
            decision,
            level,
        }
    }
}
