//! `/proc` based snapshots
//!
//! Memory comes straight from `/proc/meminfo`. CPU usage is the busy share
//! of the aggregate `cpu` line of `/proc/stat` between two reads, so the
//! first snapshot after start reports 0%.

use super::{StatsError, StatsProvider};
use crate::models::SystemStats;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const MEMINFO: &str = "meminfo";
const STAT: &str = "stat";

/// Memory figures from `/proc/meminfo`, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn used_percent(&self) -> f64 {
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Cumulative jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub total: u64,
    /// idle + iowait
    pub idle: u64,
}

impl CpuTimes {
    /// Busy percentage between `previous` and `self`
    pub fn busy_percent_since(&self, previous: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(previous.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(previous.idle).min(total);
        (total - idle) as f64 / total as f64 * 100.0
    }
}

/// Parse `/proc/meminfo` contents
pub fn parse_meminfo(content: &str) -> Result<MemInfo, StatsError> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Ok(kib) = parts[1].parse::<u64>() else {
            continue;
        };
        match parts[0] {
            "MemTotal:" => total = Some(kib * 1024),
            "MemAvailable:" => available = Some(kib * 1024),
            _ => {}
        }
    }

    let total_bytes = total.filter(|t| *t > 0).ok_or(StatsError::MissingField {
        field: "MemTotal",
        source_name: MEMINFO,
    })?;

    Ok(MemInfo {
        total_bytes,
        available_bytes: available.unwrap_or(0),
    })
}

/// Parse the aggregate `cpu` line of `/proc/stat`
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, StatsError> {
    let line = content.lines().next().ok_or(StatsError::Malformed {
        source_name: STAT,
        reason: "empty file".to_string(),
    })?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 || fields[0] != "cpu" {
        return Err(StatsError::Malformed {
            source_name: STAT,
            reason: format!("unexpected first line {line:?}"),
        });
    }

    let values: Vec<u64> = fields[1..]
        .iter()
        .map(|v| v.parse().unwrap_or(0))
        .collect();

    // user nice system idle iowait ...
    Ok(CpuTimes {
        total: values.iter().sum(),
        idle: values[3] + values[4],
    })
}

/// Stats provider reading a proc filesystem
pub struct ProcStatsProvider {
    proc_path: PathBuf,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcStatsProvider {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create provider with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            last_cpu: Mutex::new(None),
        }
    }

    pub fn proc_path(&self) -> &Path {
        &self.proc_path
    }

    async fn read(&self, name: &str) -> Result<String, StatsError> {
        let path = self.proc_path.join(name);
        fs::read_to_string(&path)
            .await
            .map_err(|source| StatsError::Io { path, source })
    }
}

impl Default for ProcStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsProvider for ProcStatsProvider {
    async fn snapshot(&self) -> Result<SystemStats, StatsError> {
        let memory = parse_meminfo(&self.read(MEMINFO).await?)?;
        let cpu = parse_cpu_times(&self.read(STAT).await?)?;

        let mut last_cpu = self.last_cpu.lock().await;
        let cpu_percent = last_cpu
            .map(|previous| cpu.busy_percent_since(&previous))
            .unwrap_or(0.0);
        *last_cpu = Some(cpu);

        debug!(
            cpu_percent,
            memory_percent = memory.used_percent(),
            "Read host stats"
        );

        Ok(SystemStats {
            cpu_percent,
            memory_percent: memory.used_percent(),
            total_memory_bytes: memory.total_bytes,
            used_memory_bytes: memory.used_bytes(),
        })
    }
}
