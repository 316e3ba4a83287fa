//! Usage ceiling: configured origin plus the periodically drifting value

use super::target::HARD_CEILING_PERCENT;
use rand::Rng;
use std::sync::RwLock;
use thiserror::Error;

/// Ceiling used when none or an invalid one is configured
pub const DEFAULT_PEAK_USAGE: u32 = 40;

/// Lowest ceiling the plan ever runs with
pub const MIN_PEAK_USAGE: u32 = 5;

/// Lower bound of the drift range as a fraction of the origin
const DRIFT_FLOOR_FACTOR: f64 = 0.2;

/// Problems with the configured peak usage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("peak usage {value:?} is not an integer")]
    Invalid { value: String },

    #[error("peak usage {value} is outside 1..=100")]
    OutOfRange { value: i64 },

    #[error("peak usage {value} is below the minimum of {floor}")]
    BelowFloor { value: u32, floor: u32 },
}

/// Turn a raw peak usage setting into the ceiling to run with
///
/// Always yields a usable value. The error, when present, describes the
/// substitution that was made and should be surfaced as a warning.
pub fn resolve_peak_usage(raw: Option<&str>) -> (u32, Option<ConfigError>) {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return (DEFAULT_PEAK_USAGE, None);
    };

    let value = match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            return (
                DEFAULT_PEAK_USAGE,
                Some(ConfigError::Invalid {
                    value: raw.to_string(),
                }),
            )
        }
    };

    if !(1..=100).contains(&value) {
        return (DEFAULT_PEAK_USAGE, Some(ConfigError::OutOfRange { value }));
    }

    let value = value as u32;
    if value < MIN_PEAK_USAGE {
        return (
            MIN_PEAK_USAGE,
            Some(ConfigError::BelowFloor {
                value,
                floor: MIN_PEAK_USAGE,
            }),
        );
    }

    (value, None)
}

/// Summary of one drift
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftOutcome {
    pub origin: u32,
    pub old: u32,
    pub new: u32,
    pub range_min: f64,
    pub range_max: f64,
}

/// Configured ceiling and its drifting current value
#[derive(Debug)]
pub struct UsagePlan {
    origin: u32,
    current: RwLock<u32>,
}

impl UsagePlan {
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            current: RwLock::new(origin),
        }
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Ceiling in effect right now
    pub fn current(&self) -> u32 {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-sample the ceiling uniformly from `[0.2 * origin, origin]`
    pub fn drift<R: Rng + ?Sized>(&self, rng: &mut R) -> DriftOutcome {
        let range_min = f64::from(self.origin) * DRIFT_FLOOR_FACTOR;
        let range_max = f64::from(self.origin);
        let sampled = range_min + rng.gen::<f64>() * (range_max - range_min);

        let new = (sampled as u32)
            .max(range_min as u32)
            .max(MIN_PEAK_USAGE)
            .min(HARD_CEILING_PERCENT as u32);

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let old = *current;
        *current = new;

        DriftOutcome {
            origin: self.origin,
            old,
            new,
            range_min,
            range_max,
        }
    }
}
