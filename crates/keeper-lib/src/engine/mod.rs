//! Controllable background load
//!
//! This module provides the two load engines driven by the controller:
//! - A duty-cycling CPU worker pool tuned by one shared intensity value
//! - A memory balloon built from touched fixed-size blocks

mod cpu;
mod memory;

pub use cpu::{CpuLoadEngine, DEFAULT_WORKERS, INITIAL_INTENSITY};
pub use memory::{MemoryLoadEngine, MemoryStep, BLOCK_SIZE};

use crate::models::Resource;

/// A load engine that can be nudged one discrete step at a time
pub trait LoadEngine: Send + Sync {
    /// Resource this engine loads
    fn resource(&self) -> Resource;

    /// Take one step up or down; returns the engine level afterwards
    /// (intensity for CPU, balloon bytes for memory)
    fn step(&self, increase: bool) -> u64;

    /// Current engine level in the same unit as `step`
    fn level(&self) -> u64;
}
