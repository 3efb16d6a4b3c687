//! Scheduler configuration — the recognized options, serde-defaulted.
//!
//! Loading is tolerant: a missing or corrupt file yields defaults rather
//! than an error, so a half-written config can never keep the scheduler
//! from starting.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ANALYSIS_TIMEOUT_MS, DEFAULT_EXECUTION_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT,
    DEFAULT_QUOTA_CHECK_INTERVAL_MS,
};
use crate::execution::ExecutionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cap on in-flight executions across all keys.
    pub max_concurrent: usize,
    /// When false, submitted dependency lists are treated as "no
    /// constraints" and silently ignored.
    pub enable_dependency_graph: bool,
    /// Master switch for the resource monitor and quota ticks.
    pub enable_resource_quotas: bool,
    /// Period of the per-execution quota check.
    pub quota_check_interval_ms: u64,
    /// Orchestrator deadline for execution jobs.
    pub max_execution_time_ms: u64,
    /// Orchestrator deadline for analysis jobs.
    pub max_analysis_time_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            enable_dependency_graph: true,
            enable_resource_quotas: true,
            quota_check_interval_ms: DEFAULT_QUOTA_CHECK_INTERVAL_MS,
            max_execution_time_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            max_analysis_time_ms: DEFAULT_ANALYSIS_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Load from a JSON file, defaults on any failure.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Clamp out-of-range values to something runnable.
    pub fn validated(mut self) -> Self {
        if self.max_concurrent == 0 {
            tracing::warn!("max_concurrent=0 clamped to 1");
            self.max_concurrent = 1;
        }
        if self.quota_check_interval_ms == 0 {
            tracing::warn!("quota_check_interval_ms=0 clamped to 1");
            self.quota_check_interval_ms = 1;
        }
        self
    }

    /// Deadline for one mode's job body.
    pub fn timeout_for(&self, mode: ExecutionMode) -> Duration {
        match mode {
            ExecutionMode::Execution => Duration::from_millis(self.max_execution_time_ms),
            ExecutionMode::Analysis => Duration::from_millis(self.max_analysis_time_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert!(config.enable_dependency_graph);
        assert!(config.enable_resource_quotas);
        assert_eq!(config.quota_check_interval_ms, 5_000);
        assert_eq!(config.max_execution_time_ms, 300_000);
        assert_eq!(config.max_analysis_time_ms, 120_000);
    }

    #[test]
    fn test_load_missing_and_corrupt_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SchedulerConfig::load(&dir.path().join("nope.json"));
        assert_eq!(missing.max_concurrent, 10);

        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let corrupt = SchedulerConfig::load(&path);
        assert_eq!(corrupt.max_concurrent, 10);
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_concurrent": 3, "enable_resource_quotas": false}"#)
            .unwrap();

        let config = SchedulerConfig::load(&path);
        assert_eq!(config.max_concurrent, 3);
        assert!(!config.enable_resource_quotas);
        assert_eq!(config.quota_check_interval_ms, 5_000);
    }

    #[test]
    fn test_validated_clamps_zero_concurrency() {
        let config = SchedulerConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert_eq!(config.validated().max_concurrent, 1);
    }

    #[test]
    fn test_timeout_per_mode() {
        let config = SchedulerConfig::default();
        assert_eq!(
            config.timeout_for(ExecutionMode::Execution),
            Duration::from_millis(300_000)
        );
        assert_eq!(
            config.timeout_for(ExecutionMode::Analysis),
            Duration::from_millis(120_000)
        );
    }
}
