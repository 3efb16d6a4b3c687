//! Metrics sink — the counter/histogram/gauge seam the pool and the
//! orchestrator emit into.
//!
//! Metric names and labels are contractual (dashboards depend on them).
//! The default sink is a Prometheus registry owned by the sink instance,
//! never the process-global default, so multiple pools in one process can
//! share or separate namespaces by sharing or separating sinks.

use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

use crate::constants::{EXECUTION_DURATION_BUCKETS_MS, QUEUE_WAIT_BUCKETS_MS};

// ── Contractual metric names ──

pub const EXECUTIONS_TOTAL: &str = "executions_total";
pub const EXECUTION_DURATION_MS: &str = "execution_duration_ms";
pub const TASKS_COMPLETED_TOTAL: &str = "tasks_completed_total";
pub const MESSAGES_PROCESSED_TOTAL: &str = "messages_processed_total";
pub const ACTIVE_EXECUTIONS: &str = "active_executions";
pub const QUEUE_DEPTH: &str = "queue_depth";
pub const QUEUE_WAIT_TIME_MS: &str = "queue_wait_time_ms";
pub const QUOTA_VIOLATIONS_TOTAL: &str = "quota_violations_total";
pub const HEALTH_SCORE: &str = "health_score";
pub const ANALYSIS_EXECUTIONS_TOTAL: &str = "analysis_executions_total";
pub const ANALYSIS_DURATION_MS: &str = "analysis_duration_ms";
pub const MEMORY_USAGE_BYTES: &str = "memory_usage_bytes";
pub const CPU_USAGE_PERCENT: &str = "cpu_usage_percent";

/// Opaque emission interface. Implementations must tolerate unknown names
/// (ignore, optionally log) so emitters never fail on metrics.
pub trait MetricsSink: Send + Sync {
    fn counter_inc(&self, name: &str, labels: &[(&str, &str)], delta: u64);
    fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that drops everything. Default for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter_inc(&self, _name: &str, _labels: &[(&str, &str)], _delta: u64) {}
    fn histogram_observe(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn gauge_set(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Prometheus-backed sink with every contractual family pre-registered.
pub struct PrometheusMetrics {
    registry: Registry,
    executions_total: IntCounterVec,
    execution_duration_ms: HistogramVec,
    tasks_completed_total: IntCounterVec,
    messages_processed_total: IntCounterVec,
    active_executions: Gauge,
    queue_depth: Gauge,
    queue_wait_time_ms: HistogramVec,
    quota_violations_total: IntCounterVec,
    health_score: GaugeVec,
    analysis_executions_total: IntCounterVec,
    analysis_duration_ms: HistogramVec,
    memory_usage_bytes: GaugeVec,
    cpu_usage_percent: Gauge,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let executions_total = counter_vec(
            &registry,
            EXECUTIONS_TOTAL,
            "Executions by mode, terminal status and agent key",
            &["mode", "status", "key"],
        );
        let execution_duration_ms = histogram_vec(
            &registry,
            EXECUTION_DURATION_MS,
            "Execution wall time in milliseconds",
            &["mode", "key"],
            &EXECUTION_DURATION_BUCKETS_MS,
        );
        let tasks_completed_total = counter_vec(
            &registry,
            TASKS_COMPLETED_TOTAL,
            "Tasks completed by agent key",
            &["key"],
        );
        let messages_processed_total = counter_vec(
            &registry,
            MESSAGES_PROCESSED_TOTAL,
            "Messages processed by agent key",
            &["key"],
        );
        let active_executions = gauge(&registry, ACTIVE_EXECUTIONS, "Currently running executions");
        let queue_depth = gauge(&registry, QUEUE_DEPTH, "Executions waiting in the queue");
        let queue_wait_time_ms = histogram_vec(
            &registry,
            QUEUE_WAIT_TIME_MS,
            "Time spent queued before starting, in milliseconds",
            &[],
            &QUEUE_WAIT_BUCKETS_MS,
        );
        let quota_violations_total = counter_vec(
            &registry,
            QUOTA_VIOLATIONS_TOTAL,
            "Observed quota violations by axis and agent key",
            &["violation_type", "key"],
        );
        let health_score = gauge_vec(
            &registry,
            HEALTH_SCORE,
            "Agent health score, 0-100",
            &["key"],
        );
        let analysis_executions_total = counter_vec(
            &registry,
            ANALYSIS_EXECUTIONS_TOTAL,
            "Analysis runs by terminal status and agent key",
            &["status", "key"],
        );
        let analysis_duration_ms = histogram_vec(
            &registry,
            ANALYSIS_DURATION_MS,
            "Analysis wall time in milliseconds",
            &["key"],
            &EXECUTION_DURATION_BUCKETS_MS,
        );
        let memory_usage_bytes = gauge_vec(
            &registry,
            MEMORY_USAGE_BYTES,
            "Process memory by type",
            &["type"],
        );
        let cpu_usage_percent = gauge(
            &registry,
            CPU_USAGE_PERCENT,
            "Process CPU percent, lifetime-normalized",
        );

        Self {
            registry,
            executions_total,
            execution_duration_ms,
            tasks_completed_total,
            messages_processed_total,
            active_executions,
            queue_depth,
            queue_wait_time_ms,
            quota_violations_total,
            health_score,
            analysis_executions_total,
            analysis_duration_ms,
            memory_usage_bytes,
            cpu_usage_percent,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn counter_inc(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        match name {
            EXECUTIONS_TOTAL => self
                .executions_total
                .with_label_values(&[
                    label(labels, "mode"),
                    label(labels, "status"),
                    label(labels, "key"),
                ])
                .inc_by(delta),
            TASKS_COMPLETED_TOTAL => self
                .tasks_completed_total
                .with_label_values(&[label(labels, "key")])
                .inc_by(delta),
            MESSAGES_PROCESSED_TOTAL => self
                .messages_processed_total
                .with_label_values(&[label(labels, "key")])
                .inc_by(delta),
            QUOTA_VIOLATIONS_TOTAL => self
                .quota_violations_total
                .with_label_values(&[label(labels, "violation_type"), label(labels, "key")])
                .inc_by(delta),
            ANALYSIS_EXECUTIONS_TOTAL => self
                .analysis_executions_total
                .with_label_values(&[label(labels, "status"), label(labels, "key")])
                .inc_by(delta),
            _ => tracing::debug!(name, "Unknown counter, dropped"),
        }
    }

    fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        match name {
            EXECUTION_DURATION_MS => self
                .execution_duration_ms
                .with_label_values(&[label(labels, "mode"), label(labels, "key")])
                .observe(value),
            QUEUE_WAIT_TIME_MS => self
                .queue_wait_time_ms
                .with_label_values(&[])
                .observe(value),
            ANALYSIS_DURATION_MS => self
                .analysis_duration_ms
                .with_label_values(&[label(labels, "key")])
                .observe(value),
            _ => tracing::debug!(name, "Unknown histogram, dropped"),
        }
    }

    fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        match name {
            ACTIVE_EXECUTIONS => self.active_executions.set(value),
            QUEUE_DEPTH => self.queue_depth.set(value),
            HEALTH_SCORE => self
                .health_score
                .with_label_values(&[label(labels, "key")])
                .set(value),
            MEMORY_USAGE_BYTES => self
                .memory_usage_bytes
                .with_label_values(&[label(labels, "type")])
                .set(value),
            CPU_USAGE_PERCENT => self.cpu_usage_percent.set(value),
            _ => tracing::debug!(name, "Unknown gauge, dropped"),
        }
    }
}

fn label<'a>(labels: &'a [(&str, &str)], name: &str) -> &'a str {
    labels
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("counter family construction");
    registry
        .register(Box::new(vec.clone()))
        .expect("counter family registration");
    vec
}

fn histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: &[f64],
) -> HistogramVec {
    let vec = HistogramVec::new(
        HistogramOpts::new(name, help).buckets(buckets.to_vec()),
        labels,
    )
    .expect("histogram family construction");
    registry
        .register(Box::new(vec.clone()))
        .expect("histogram family registration");
    vec
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("gauge construction");
    registry
        .register(Box::new(gauge.clone()))
        .expect("gauge registration");
    gauge
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let vec = GaugeVec::new(Opts::new(name, help), labels).expect("gauge family construction");
    registry
        .register(Box::new(vec.clone()))
        .expect("gauge family registration");
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contractual_families_export() {
        let sink = PrometheusMetrics::new();
        sink.counter_inc(
            EXECUTIONS_TOTAL,
            &[("mode", "execution"), ("status", "success"), ("key", "a")],
            1,
        );
        sink.histogram_observe(
            EXECUTION_DURATION_MS,
            &[("mode", "execution"), ("key", "a")],
            250.0,
        );
        sink.gauge_set(ACTIVE_EXECUTIONS, &[], 3.0);
        sink.gauge_set(HEALTH_SCORE, &[("key", "a")], 87.5);
        sink.counter_inc(
            QUOTA_VIOLATIONS_TOTAL,
            &[("violation_type", "memory"), ("key", "a")],
            1,
        );

        let text = sink.export();
        assert!(text.contains("executions_total"));
        assert!(text.contains("execution_duration_ms_bucket"));
        assert!(text.contains("active_executions 3"));
        assert!(text.contains("health_score"));
        assert!(text.contains("quota_violations_total"));
    }

    #[test]
    fn test_unknown_names_are_dropped_not_fatal() {
        let sink = PrometheusMetrics::new();
        sink.counter_inc("made_up_counter", &[], 1);
        sink.histogram_observe("made_up_histogram", &[], 1.0);
        sink.gauge_set("made_up_gauge", &[], 1.0);
        assert!(!sink.export().contains("made_up"));
    }

    #[test]
    fn test_missing_label_defaults_to_empty() {
        let sink = PrometheusMetrics::new();
        // No labels supplied at all; the family still records.
        sink.counter_inc(EXECUTIONS_TOTAL, &[], 2);
        assert!(sink.export().contains("executions_total"));
    }
}
