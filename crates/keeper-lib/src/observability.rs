//! Event sink for the control loop
//!
//! Every observable step of the loop goes through [`EventSink`]. The
//! default sink, [`StructuredLogger`], turns events into structured
//! `tracing` records carrying an `event` field.

use crate::control::{ConfigError, ControlEvent, Decision, DriftOutcome, HARD_CEILING_PERCENT};
use crate::models::SystemStats;
use crate::stats::StatsError;
use tracing::{info, warn};

/// Startup parameters worth reporting once
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartupSummary {
    pub peak_usage_origin: u32,
    pub peak_usage: u32,
    pub cpu_workers: usize,
    pub total_memory_bytes: u64,
}

/// Per-tick view of the loop before the controller runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSummary {
    pub stats: SystemStats,
    pub target_percent: f64,
    pub night: bool,
    pub balloon_bytes: u64,
    pub cpu_intensity: u64,
}

/// Receiver of control loop events
pub trait EventSink: Send + Sync {
    fn startup(&self, summary: &StartupSummary);

    fn config_fallback(&self, error: &ConfigError, peak_usage: u32);

    fn tick(&self, summary: &TickSummary);

    fn control(&self, event: &ControlEvent);

    fn stats_fallback(&self, error: &StatsError);

    fn compaction(&self, freed_slots: usize, balloon_bytes: u64);

    fn drift(&self, outcome: &DriftOutcome);

    fn shutdown(&self, reason: &str);
}

/// Structured logger for keeper events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }
}

impl EventSink for StructuredLogger {
    fn startup(&self, summary: &StartupSummary) {
        info!(
            event = "keeper_started",
            node = %self.node_name,
            peak_usage_origin = summary.peak_usage_origin,
            peak_usage = summary.peak_usage,
            hard_peak_limit = HARD_CEILING_PERCENT,
            cpu_workers = summary.cpu_workers,
            total_memory_gb = summary.total_memory_bytes / (1024 * 1024 * 1024),
            "Load keeper started"
        );
    }

    fn config_fallback(&self, error: &ConfigError, peak_usage: u32) {
        warn!(
            event = "config_fallback",
            node = %self.node_name,
            error = %error,
            peak_usage = peak_usage,
            "Peak usage setting replaced"
        );
    }

    fn tick(&self, summary: &TickSummary) {
        info!(
            event = "resource_monitor",
            node = %self.node_name,
            cpu_percent = summary.stats.cpu_percent,
            memory_percent = summary.stats.memory_percent,
            expected_usage = summary.target_percent,
            is_night_time = summary.night,
            balloon_mb = summary.balloon_bytes / (1024 * 1024),
            cpu_intensity = summary.cpu_intensity,
            "Resource usage sampled"
        );
    }

    fn control(&self, event: &ControlEvent) {
        let resource = event.resource.as_str();
        match event.decision {
            Decision::Forced => {
                warn!(
                    event = "control_decision",
                    node = %self.node_name,
                    resource = resource,
                    current_percent = event.measured_percent,
                    hard_peak = HARD_CEILING_PERCENT,
                    decision = "forced",
                    action = "decrease",
                    level = ?event.level,
                    "Usage above hard peak, forcing decrease"
                );
            }
            Decision::Skip => {
                info!(
                    event = "control_decision",
                    node = %self.node_name,
                    resource = resource,
                    current_percent = event.measured_percent,
                    target_percent = event.target_percent,
                    decision = "skip",
                    "Adjustment skipped"
                );
            }
            Decision::Adjust {
                increase_probability,
                increase,
            } => {
                let action = if increase { "increase" } else { "decrease" };
                info!(
                    event = "control_decision",
                    node = %self.node_name,
                    resource = resource,
                    current_percent = event.measured_percent,
                    target_percent = event.target_percent,
                    decision = "adjust",
                    increase_probability = increase_probability,
                    action = action,
                    level = ?event.level,
                    "Load adjusted"
                );
            }
        }
    }

    fn stats_fallback(&self, error: &StatsError) {
        warn!(
            event = "stats_fallback",
            node = %self.node_name,
            error = %error,
            "Failed to read host stats, reusing previous snapshot"
        );
    }

    fn compaction(&self, freed_slots: usize, balloon_bytes: u64) {
        info!(
            event = "compaction",
            node = %self.node_name,
            freed_slots = freed_slots,
            balloon_mb = balloon_bytes / (1024 * 1024),
            "Compacted memory balloon"
        );
    }

    fn drift(&self, outcome: &DriftOutcome) {
        let range = format!("[{:.1}, {}]", outcome.range_min, outcome.origin);
        info!(
            event = "peak_usage_drift",
            node = %self.node_name,
            peak_usage_origin = outcome.origin,
            peak_usage_old = outcome.old,
            peak_usage_new = outcome.new,
            range = %range,
            "Peak usage drifted"
        );
    }

    fn shutdown(&self, reason: &str) {
        info!(
            event = "keeper_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Load keeper shutting down"
        );
    }
}
