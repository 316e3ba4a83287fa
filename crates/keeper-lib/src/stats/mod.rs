//! Host resource snapshots
//!
//! The control loop only sees snapshots through [`StatsProvider`]. The
//! bundled provider reads `/proc/meminfo` and `/proc/stat`.

mod procfs;

pub use procfs::{parse_cpu_times, parse_meminfo, CpuTimes, MemInfo, ProcStatsProvider};

use crate::models::SystemStats;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to produce a snapshot
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{field} missing from {source_name}")]
    MissingField {
        field: &'static str,
        source_name: &'static str,
    },

    #[error("malformed {source_name}: {reason}")]
    Malformed {
        source_name: &'static str,
        reason: String,
    },
}

/// Source of point-in-time resource usage
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn snapshot(&self) -> Result<SystemStats, StatsError>;
}
