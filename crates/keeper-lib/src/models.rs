//! Core data models for the load keeper

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time host resource snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Busy share of all cores since the previous sample, 0-100
    pub cpu_percent: f64,
    /// Used share of physical memory, 0-100
    pub memory_percent: f64,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
}

impl SystemStats {
    /// Measured utilization for one resource
    pub fn percent_for(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_percent,
            Resource::Memory => self.memory_percent,
        }
    }
}

/// A host resource under control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
