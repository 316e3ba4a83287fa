//! Keeper configuration

use anyhow::Result;
use keeper_lib::LoopConfig;
use serde::Deserialize;
use std::time::Duration;

/// Keeper configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Name reported in every log event
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Root of the proc filesystem to sample
    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    /// Stats sampling and adjustment interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Balloon compaction interval in seconds
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval_secs: u64,

    /// Ceiling drift interval in seconds
    #[serde(default = "default_drift_interval")]
    pub drift_interval_secs: u64,

    /// Raw peak usage setting from `P` (or `p`), validated by the library
    #[serde(skip)]
    pub peak_usage: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

fn default_sample_interval() -> u64 {
    3
}

fn default_compaction_interval() -> u64 {
    60
}

fn default_drift_interval() -> u64 {
    300
}

/// `P` takes precedence over `p`; empty values count as unset
fn raw_peak_usage(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["P", "p"]
        .into_iter()
        .filter_map(lookup)
        .find(|value| !value.is_empty())
}

impl KeeperConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("KEEPER").try_parsing(true))
            .build()?;

        let mut loaded = config.try_deserialize().unwrap_or_else(|_| KeeperConfig {
            node_name: default_node_name(),
            proc_path: default_proc_path(),
            sample_interval_secs: default_sample_interval(),
            compaction_interval_secs: default_compaction_interval(),
            drift_interval_secs: default_drift_interval(),
            peak_usage: None,
        });
        loaded.peak_usage = raw_peak_usage(|key| std::env::var(key).ok());

        Ok(loaded)
    }

    /// Timer periods for the control loop
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            sample_interval: Duration::from_secs(self.sample_interval_secs),
            compaction_interval: Duration::from_secs(self.compaction_interval_secs),
            drift_interval: Duration::from_secs(self.drift_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_upper_case_peak_usage_wins() {
        let raw = raw_peak_usage(lookup(&[("P", "55"), ("p", "20")]));
        assert_eq!(raw.as_deref(), Some("55"));
    }

    #[test]
    fn test_lower_case_peak_usage_fallback() {
        assert_eq!(raw_peak_usage(lookup(&[("p", "20")])).as_deref(), Some("20"));
        assert_eq!(
            raw_peak_usage(lookup(&[("P", ""), ("p", "20")])).as_deref(),
            Some("20")
        );
        assert_eq!(raw_peak_usage(lookup(&[])), None);
    }

    #[test]
    fn test_loop_config_from_seconds() {
        let config = KeeperConfig {
            node_name: "node".to_string(),
            proc_path: default_proc_path(),
            sample_interval_secs: default_sample_interval(),
            compaction_interval_secs: default_compaction_interval(),
            drift_interval_secs: default_drift_interval(),
            peak_usage: None,
        };

        let loop_config = config.loop_config();
        assert_eq!(loop_config.sample_interval, Duration::from_secs(3));
        assert_eq!(loop_config.compaction_interval, Duration::from_secs(60));
        assert_eq!(loop_config.drift_interval, Duration::from_secs(300));
    }
}
