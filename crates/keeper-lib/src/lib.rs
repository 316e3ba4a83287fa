//! Adaptive resource engine for keeping a host at a baseline load
//!
//! This crate provides the core functionality for:
//! - Duty-cycled CPU load and a touched-memory balloon
//! - Target calculation with drift and a hard safety ceiling
//! - Probabilistic closed-loop control of both engines
//! - Host stats collection from procfs
//! - Structured event logging

pub mod control;
pub mod engine;
pub mod models;
pub mod observability;
pub mod stats;

pub use control::{
    AdaptiveController, ConfigError, ControlEvent, ControlLoop, ControlLoopBuilder, Decision,
    LoopConfig, UsagePlan,
};
pub use engine::{CpuLoadEngine, LoadEngine, MemoryLoadEngine};
pub use models::*;
pub use observability::{EventSink, StartupSummary, StructuredLogger, TickSummary};
pub use stats::{ProcStatsProvider, StatsError, StatsProvider};
