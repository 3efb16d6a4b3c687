//! Resource Monitor — process-level usage sampling and quota evaluation.
//!
//! The monitor observes, it never terminates: quota checks compare a live
//! sample against per-execution ceilings and hand the verdict back to the
//! pool. Only per-id wall-clock baselines are kept; samples are not.
//!
//! CPU% is total accumulated process CPU time over total process uptime,
//! normalized so 100% means one full core for the process lifetime and
//! clamped to [0, 100]. Long-lived processes dilute brief spikes toward
//! zero; known limitation, kept for parity with existing dashboards.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::quota::{MemoryStats, QuotaEvaluation, ResourceQuota, ResourceSample};
use crate::time_utils;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct ResourceMonitor {
    pid: Pid,
    system: Mutex<System>,
    baselines: Mutex<HashMap<String, Instant>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// Record the wall-clock baseline for an execution.
    pub fn start_monitoring(&self, execution_id: &str) {
        let mut baselines = lock_recover(&self.baselines);
        baselines.insert(execution_id.to_string(), Instant::now());
        tracing::debug!(execution_id, "Resource monitoring started");
    }

    /// Drop the baseline. Idempotent — unknown ids are a no-op.
    pub fn stop_monitoring(&self, execution_id: &str) {
        let mut baselines = lock_recover(&self.baselines);
        baselines.remove(execution_id);
    }

    /// Seconds since `start_monitoring`, or None when never started.
    pub fn runtime_seconds(&self, execution_id: &str) -> Option<f64> {
        let baselines = lock_recover(&self.baselines);
        baselines
            .get(execution_id)
            .map(|started| started.elapsed().as_secs_f64())
    }

    /// Number of executions currently holding a baseline.
    pub fn monitored_count(&self) -> usize {
        lock_recover(&self.baselines).len()
    }

    /// Live snapshot of the current process. A vanished process (possible
    /// only in exotic sandboxes) reads as zero usage rather than an error.
    pub fn current_usage(&self) -> ResourceSample {
        let mut system = lock_recover(&self.system);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let (memory_bytes, cpu_percent) = match system.process(self.pid) {
            Some(process) => {
                let uptime_ms = process.run_time().saturating_mul(1_000);
                let cpu = if uptime_ms > 0 {
                    let accumulated_ms = process.accumulated_cpu_time();
                    (accumulated_ms as f64 / uptime_ms as f64) * 100.0
                } else {
                    0.0
                };
                (process.memory(), cpu.clamp(0.0, 100.0))
            }
            None => (0, 0.0),
        };

        ResourceSample {
            memory_bytes,
            memory_mb: memory_bytes as f64 / BYTES_PER_MB,
            cpu_percent,
            timestamp: time_utils::now(),
        }
    }

    /// Evaluate `quota` against a fresh sample. Stateless with respect to
    /// past samples; the time axis fires only if monitoring was started.
    pub fn check_quota(&self, execution_id: &str, quota: &ResourceQuota) -> QuotaEvaluation {
        let sample = self.current_usage();
        let runtime_minutes = self.runtime_seconds(execution_id).map(|s| s / 60.0);
        QuotaEvaluation::evaluate(execution_id, sample, *quota, runtime_minutes)
    }

    /// Pool-wide memory report. Native-process mapping: heap figures come
    /// from process RSS / virtual size, limits from system memory.
    pub fn memory_stats(&self) -> MemoryStats {
        let mut system = lock_recover(&self.system);
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let (rss, virt) = match system.process(self.pid) {
            Some(process) => (process.memory(), process.virtual_memory()),
            None => (0, 0),
        };

        MemoryStats {
            heap_used_mb: rss as f64 / BYTES_PER_MB,
            heap_total_mb: virt as f64 / BYTES_PER_MB,
            heap_limit_mb: system.total_memory() as f64 / BYTES_PER_MB,
            heap_available_mb: system.available_memory() as f64 / BYTES_PER_MB,
            rss_mb: rss as f64 / BYTES_PER_MB,
            external_mb: virt.saturating_sub(rss) as f64 / BYTES_PER_MB,
        }
    }

    /// Drop all baselines. Test support.
    pub fn clear(&self) {
        lock_recover(&self.baselines).clear();
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Monitor sections never run user code, so poisoning here means another
/// monitor call panicked; the inner value is still coherent.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_sane() {
        let monitor = ResourceMonitor::new();
        let sample = monitor.current_usage();
        assert!(sample.memory_bytes > 0, "a running test has resident memory");
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!((sample.memory_mb - sample.memory_bytes as f64 / BYTES_PER_MB).abs() < 1e-9);
    }

    #[test]
    fn test_start_stop_roundtrip_is_clean() {
        let monitor = ResourceMonitor::new();
        monitor.start_monitoring("exec-1");
        assert!(monitor.runtime_seconds("exec-1").is_some());
        assert_eq!(monitor.monitored_count(), 1);

        monitor.stop_monitoring("exec-1");
        assert!(monitor.runtime_seconds("exec-1").is_none());
        assert_eq!(monitor.monitored_count(), 0);

        // Idempotent
        monitor.stop_monitoring("exec-1");
        assert_eq!(monitor.monitored_count(), 0);
    }

    #[test]
    fn test_check_quota_time_axis_uses_baseline() {
        let monitor = ResourceMonitor::new();
        let quota = ResourceQuota {
            max_execution_minutes: Some(0.000001),
            ..Default::default()
        };

        // Never started: time axis silent even with a tiny limit.
        let eval = monitor.check_quota("exec-9", &quota);
        assert!(!eval.time_exceeded);

        monitor.start_monitoring("exec-9");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let eval = monitor.check_quota("exec-9", &quota);
        assert!(eval.time_exceeded);
        assert!(eval.violation_message.unwrap().starts_with("Time: "));
    }

    #[test]
    fn test_memory_stats_fields_consistent() {
        let monitor = ResourceMonitor::new();
        let stats = monitor.memory_stats();
        assert!(stats.heap_limit_mb > 0.0);
        assert!(stats.rss_mb > 0.0);
        assert!((stats.heap_used_mb - stats.rss_mb).abs() < 1e-9);
    }

    #[test]
    fn test_clear_drops_all_baselines() {
        let monitor = ResourceMonitor::new();
        monitor.start_monitoring("exec-1");
        monitor.start_monitoring("exec-2");
        monitor.clear();
        assert_eq!(monitor.monitored_count(), 0);
    }
}
