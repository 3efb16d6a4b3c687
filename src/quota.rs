//! Resource quota value objects — limits, live samples, evaluations.
//!
//! A quota never terminates anything: the monitor evaluates it against a
//! live sample and the pool reports violations through metrics and logs
//! while the execution keeps running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional per-execution ceilings. `None` and `0` both mean "unlimited"
/// on that axis.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuota {
    #[serde(default)]
    pub max_memory_mb: Option<f64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
    #[serde(default)]
    pub max_execution_minutes: Option<f64>,
}

impl ResourceQuota {
    /// True when no axis carries an effective limit.
    pub fn is_unlimited(&self) -> bool {
        !limit_set(self.max_memory_mb)
            && !limit_set(self.max_cpu_percent)
            && !limit_set(self.max_execution_minutes)
    }
}

/// A limit counts only when present and strictly positive.
fn limit_set(limit: Option<f64>) -> bool {
    matches!(limit, Some(v) if v > 0.0)
}

/// Instantaneous process-level snapshot. Derived, never stored long-term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of evaluating one quota against one live sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEvaluation {
    pub execution_id: String,
    pub sample: ResourceSample,
    pub quota: ResourceQuota,
    pub memory_exceeded: bool,
    pub cpu_exceeded: bool,
    pub time_exceeded: bool,
    pub any_exceeded: bool,
    /// Minutes since `start_monitoring`, when monitoring was started.
    pub runtime_minutes: Option<f64>,
    pub violation_message: Option<String>,
}

impl QuotaEvaluation {
    pub fn evaluate(
        execution_id: &str,
        sample: ResourceSample,
        quota: ResourceQuota,
        runtime_minutes: Option<f64>,
    ) -> Self {
        let memory_exceeded = limit_set(quota.max_memory_mb)
            && sample.memory_mb > quota.max_memory_mb.unwrap_or(0.0);
        let cpu_exceeded = limit_set(quota.max_cpu_percent)
            && sample.cpu_percent > quota.max_cpu_percent.unwrap_or(0.0);
        // Time only counts once monitoring has started for this id.
        let time_exceeded = match (runtime_minutes, quota.max_execution_minutes) {
            (Some(runtime), Some(limit)) if limit > 0.0 => runtime > limit,
            _ => false,
        };
        let any_exceeded = memory_exceeded || cpu_exceeded || time_exceeded;

        let violation_message = if any_exceeded {
            let mut parts = Vec::new();
            if memory_exceeded {
                parts.push(format!(
                    "Memory: {:.2} MB > {} MB",
                    sample.memory_mb,
                    quota.max_memory_mb.unwrap_or(0.0)
                ));
            }
            if cpu_exceeded {
                parts.push(format!(
                    "CPU: {:.2}% > {}%",
                    sample.cpu_percent,
                    quota.max_cpu_percent.unwrap_or(0.0)
                ));
            }
            if time_exceeded {
                parts.push(format!(
                    "Time: {:.2} min > {} min",
                    runtime_minutes.unwrap_or(0.0),
                    quota.max_execution_minutes.unwrap_or(0.0)
                ));
            }
            Some(parts.join("; "))
        } else {
            None
        };

        Self {
            execution_id: execution_id.to_string(),
            sample,
            quota,
            memory_exceeded,
            cpu_exceeded,
            time_exceeded,
            any_exceeded,
            runtime_minutes,
            violation_message,
        }
    }

    /// Axis labels for the `quota_violations_total` counter.
    pub fn violation_types(&self) -> Vec<&'static str> {
        let mut types = Vec::new();
        if self.memory_exceeded {
            types.push("memory");
        }
        if self.cpu_exceeded {
            types.push("cpu");
        }
        if self.time_exceeded {
            types.push("time");
        }
        types
    }
}

/// Pool-wide memory report. The host is a native process, so heap figures
/// are process RSS / virtual size rather than a VM heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub heap_used_mb: f64,
    pub heap_total_mb: f64,
    pub heap_limit_mb: f64,
    pub heap_available_mb: f64,
    pub rss_mb: f64,
    pub external_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(memory_mb: f64, cpu_percent: f64) -> ResourceSample {
        ResourceSample {
            memory_bytes: (memory_mb * 1024.0 * 1024.0) as u64,
            memory_mb,
            cpu_percent,
            timestamp: crate::time_utils::now(),
        }
    }

    #[test]
    fn test_zero_and_absent_mean_unlimited() {
        let zero = ResourceQuota {
            max_memory_mb: Some(0.0),
            max_cpu_percent: Some(0.0),
            max_execution_minutes: Some(0.0),
        };
        assert!(zero.is_unlimited());
        assert!(ResourceQuota::default().is_unlimited());

        let eval = QuotaEvaluation::evaluate("exec-1", sample(10_000.0, 100.0), zero, Some(9e9));
        assert!(!eval.any_exceeded);
        assert!(eval.violation_message.is_none());
    }

    #[test]
    fn test_memory_violation_message_format() {
        let quota = ResourceQuota {
            max_memory_mb: Some(100.0),
            ..Default::default()
        };
        let eval = QuotaEvaluation::evaluate("exec-1", sample(123.45, 1.0), quota, None);
        assert!(eval.memory_exceeded && eval.any_exceeded);
        assert_eq!(
            eval.violation_message.as_deref(),
            Some("Memory: 123.45 MB > 100 MB")
        );
        assert_eq!(eval.violation_types(), vec!["memory"]);
    }

    #[test]
    fn test_time_needs_monitoring_started() {
        let quota = ResourceQuota {
            max_execution_minutes: Some(5.0),
            ..Default::default()
        };
        // No baseline recorded — time axis cannot fire.
        let eval = QuotaEvaluation::evaluate("exec-1", sample(1.0, 1.0), quota, None);
        assert!(!eval.time_exceeded);

        let eval = QuotaEvaluation::evaluate("exec-1", sample(1.0, 1.0), quota, Some(6.34));
        assert!(eval.time_exceeded);
        assert_eq!(
            eval.violation_message.as_deref(),
            Some("Time: 6.34 min > 5 min")
        );
    }

    #[test]
    fn test_multi_axis_message_concatenation() {
        let quota = ResourceQuota {
            max_memory_mb: Some(100.0),
            max_cpu_percent: Some(80.0),
            max_execution_minutes: None,
        };
        let eval = QuotaEvaluation::evaluate("exec-1", sample(150.0, 87.0), quota, None);
        assert_eq!(
            eval.violation_message.as_deref(),
            Some("Memory: 150.00 MB > 100 MB; CPU: 87.00% > 80%")
        );
        assert_eq!(eval.violation_types(), vec!["memory", "cpu"]);
    }
}
