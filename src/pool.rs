//! Execution Pool — bounded worker pool with priority and dependency
//! aware admission.
//!
//! Architecture:
//!   submit() → cycle-checked graph insert → run now or enqueue
//!   each admitted execution runs on its own named worker thread
//!   worker exit → unconditional teardown → queue re-scan
//!
//! The queue is scanned, never popped blindly: only entries whose
//! dependencies are all completed are eligible, the highest priority rank
//! wins, ties break FIFO. A blocked queue leaves the pool idle rather
//! than skipping constraints.
//!
//! Quota violations are observational. A periodic ticker evaluates every
//! active execution that registered a quota and reports breaches through
//! metrics and logs; nothing is terminated.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::{CancellationToken, ExecutionPriority, JobFn, JobResult, SubmitOptions};
use crate::graph::{DependencyGraph, GraphStats};
use crate::id_gen::{self, ExecutionIdGen};
use crate::metrics::{self, MetricsSink, PrometheusMetrics};
use crate::monitor::ResourceMonitor;
use crate::quota::{MemoryStats, ResourceQuota, ResourceSample};

/// Caller's side of one submission. Resolved exactly once.
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: String,
    rx: Receiver<JobResult>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Block until the execution reaches a terminal state.
    pub fn wait(self) -> JobResult {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(SchedulerError::InvalidState("result channel closed".into())))
    }

    /// Non-blocking-ish wait; None while the execution is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(SchedulerError::InvalidState(
                "result channel closed".into(),
            ))),
        }
    }
}

/// Counters plus a live snapshot, serializable for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_quota_violations: u64,
    pub total_queue_wait_ms: u64,
    pub avg_queue_wait_ms: f64,
    pub active_count: usize,
    pub queue_depth: usize,
    pub active_execution_ids: Vec<String>,
    pub max_concurrent: usize,
}

/// Execution ids attached to one key, split by lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct KeyExecutionIds {
    pub active: Vec<String>,
    pub queued: Vec<String>,
}

/// Live usage for one active execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionUsage {
    pub execution_id: String,
    pub key: String,
    pub sample: ResourceSample,
    pub runtime_seconds: Option<f64>,
    pub quota: Option<ResourceQuota>,
}

struct QueuedExecution {
    execution_id: String,
    key: String,
    job: JobFn,
    tx: Sender<JobResult>,
    priority: ExecutionPriority,
    dependencies: Vec<String>,
    queued_at: Instant,
}

struct RunnableExecution {
    execution_id: String,
    key: String,
    job: JobFn,
    tx: Sender<JobResult>,
    quota: Option<ResourceQuota>,
}

#[derive(Default)]
struct PoolState {
    /// execution_id → key for everything currently running.
    active: HashMap<String, String>,
    queue: Vec<QueuedExecution>,
    completed: HashSet<String>,
    quotas: HashMap<String, ResourceQuota>,
    total_processed: u64,
    total_failed: u64,
    total_quota_violations: u64,
    total_queue_wait: Duration,
    dequeued: u64,
}

struct PoolInner {
    config: SchedulerConfig,
    state: Mutex<PoolState>,
    graph: DependencyGraph,
    monitor: ResourceMonitor,
    metrics: Arc<dyn MetricsSink>,
    ids: ExecutionIdGen,
}

#[derive(Clone)]
pub struct ExecutionPool {
    inner: Arc<PoolInner>,
}

impl ExecutionPool {
    /// Pool with its own Prometheus registry.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_metrics(config, Arc::new(PrometheusMetrics::new()))
    }

    /// Pool emitting into a caller-provided sink, so multiple pools can
    /// share or separate metric namespaces.
    pub fn with_metrics(config: SchedulerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let config = config.validated();
        tracing::info!(
            max_concurrent = config.max_concurrent,
            dependency_graph = config.enable_dependency_graph,
            resource_quotas = config.enable_resource_quotas,
            "Execution pool initialized"
        );

        let inner = Arc::new(PoolInner {
            config,
            state: Mutex::new(PoolState::default()),
            graph: DependencyGraph::new(),
            monitor: ResourceMonitor::new(),
            metrics,
            ids: ExecutionIdGen::new(),
        });

        if inner.config.enable_resource_quotas {
            spawn_quota_ticker(&inner);
        }

        Self { inner }
    }

    /// Submit with default options: medium priority, no deps, no quota.
    pub fn submit(&self, key: &str, job: JobFn) -> SchedulerResult<ExecutionHandle> {
        self.submit_with(key, SubmitOptions::default(), job)
    }

    /// Submit one execution. Rejections (`InvalidKey`, `DependencyCycle`)
    /// return before any slot or quota is consumed; every accepted
    /// submission resolves its handle exactly once.
    pub fn submit_with(
        &self,
        key: &str,
        opts: SubmitOptions,
        job: JobFn,
    ) -> SchedulerResult<ExecutionHandle> {
        if key.trim().is_empty() {
            return Err(SchedulerError::InvalidKey(format!("{:?}", key)));
        }

        let SubmitOptions {
            priority,
            dependencies,
            quota,
        } = opts;

        let inner = &self.inner;
        let execution_id = inner.ids.next_id();

        let dependencies = if inner.config.enable_dependency_graph {
            dependencies
        } else {
            if !dependencies.is_empty() {
                tracing::debug!(
                    %execution_id,
                    key,
                    "Dependency graph disabled, dependencies ignored"
                );
            }
            Vec::new()
        };

        if inner.config.enable_dependency_graph
            && !inner.graph.add_node(&execution_id, &dependencies)
        {
            return Err(SchedulerError::DependencyCycle(execution_id));
        }

        let deps_ready =
            dependencies.is_empty() || inner.graph.are_deps_satisfied(&execution_id);

        let (tx, rx) = mpsc::channel();
        let handle = ExecutionHandle {
            execution_id: execution_id.clone(),
            rx,
        };

        let runnable = {
            let mut state = lock_recover(&inner.state);
            if let Some(q) = quota {
                state.quotas.insert(execution_id.clone(), q);
            }

            if state.active.len() < inner.config.max_concurrent && deps_ready {
                state.active.insert(execution_id.clone(), key.to_string());
                Some(RunnableExecution {
                    execution_id: execution_id.clone(),
                    key: key.to_string(),
                    job,
                    tx,
                    quota,
                })
            } else {
                state.queue.push(QueuedExecution {
                    execution_id: execution_id.clone(),
                    key: key.to_string(),
                    job,
                    tx,
                    priority,
                    dependencies,
                    queued_at: Instant::now(),
                });
                None
            }
        };

        self.publish_gauges();
        match runnable {
            Some(exec) => {
                tracing::debug!(%execution_id, key, %priority, "Execution admitted directly");
                spawn_worker(inner, exec);
            }
            None => {
                tracing::debug!(%execution_id, key, %priority, "Execution queued");
                // A dependency may have completed between the readiness
                // check and the enqueue; one re-scan closes that window.
                schedule_next(inner);
            }
        }

        Ok(handle)
    }

    // ── Cancellation and drain ──

    /// Reject every queued execution with `QueueCleared`. Running work is
    /// untouched. Returns the number rejected.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<QueuedExecution> = {
            let mut state = lock_recover(&self.inner.state);
            let drained: Vec<_> = state.queue.drain(..).collect();
            for entry in &drained {
                state.quotas.remove(&entry.execution_id);
            }
            drained
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(SchedulerError::QueueCleared));
        }
        if count > 0 {
            tracing::info!(count, "Execution queue cleared");
        }
        self.publish_gauges();
        count
    }

    /// Remove and reject exactly the queued entries for `key`, preserving
    /// the order of the rest. Returns the number cancelled.
    pub fn cancel_queued_for_key(&self, key: &str) -> usize {
        let removed: Vec<QueuedExecution> = {
            let mut state = lock_recover(&self.inner.state);
            let mut kept = Vec::with_capacity(state.queue.len());
            let mut removed = Vec::new();
            for entry in state.queue.drain(..) {
                if entry.key == key {
                    removed.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            state.queue = kept;
            for entry in &removed {
                state.quotas.remove(&entry.execution_id);
            }
            removed
        };

        let count = removed.len();
        for entry in removed {
            let _ = entry
                .tx
                .send(Err(SchedulerError::PauseCancelled(key.to_string())));
        }
        if count > 0 {
            tracing::info!(key, count, "Queued executions cancelled for key");
        }
        self.publish_gauges();
        count
    }

    /// Informational poke: re-scan the queue for runnable work.
    pub fn resume_for_key(&self, key: &str) {
        tracing::debug!(key, "Resume poke");
        schedule_next(&self.inner);
    }

    // ── Introspection ──

    pub fn stats(&self) -> PoolStats {
        let state = lock_recover(&self.inner.state);
        let mut active_execution_ids: Vec<String> = state.active.keys().cloned().collect();
        active_execution_ids
            .sort_by_key(|id| id_gen::parse_sequence(id).unwrap_or(u64::MAX));

        let total_queue_wait_ms = state.total_queue_wait.as_millis() as u64;
        PoolStats {
            total_processed: state.total_processed,
            total_failed: state.total_failed,
            total_quota_violations: state.total_quota_violations,
            total_queue_wait_ms,
            avg_queue_wait_ms: if state.dequeued > 0 {
                total_queue_wait_ms as f64 / state.dequeued as f64
            } else {
                0.0
            },
            active_count: state.active.len(),
            queue_depth: state.queue.len(),
            active_execution_ids,
            max_concurrent: self.inner.config.max_concurrent,
        }
    }

    /// Keys of running executions. A key occupying several slots appears
    /// once per slot; the orchestrator layer is what makes keys unique.
    pub fn active_executions(&self) -> Vec<String> {
        let state = lock_recover(&self.inner.state);
        state.active.values().cloned().collect()
    }

    pub fn queue_depth(&self) -> usize {
        lock_recover(&self.inner.state).queue.len()
    }

    pub fn is_executing(&self, key: &str) -> bool {
        let state = lock_recover(&self.inner.state);
        state.active.values().any(|k| k == key)
    }

    pub fn is_queued(&self, key: &str) -> bool {
        let state = lock_recover(&self.inner.state);
        state.queue.iter().any(|e| e.key == key)
    }

    pub fn execution_ids_for(&self, key: &str) -> KeyExecutionIds {
        let state = lock_recover(&self.inner.state);
        let mut active: Vec<String> = state
            .active
            .iter()
            .filter(|(_, k)| *k == key)
            .map(|(id, _)| id.clone())
            .collect();
        active.sort_by_key(|id| id_gen::parse_sequence(id).unwrap_or(u64::MAX));
        let queued = state
            .queue
            .iter()
            .filter(|e| e.key == key)
            .map(|e| e.execution_id.clone())
            .collect();
        KeyExecutionIds { active, queued }
    }

    pub fn completed_executions(&self) -> Vec<String> {
        let state = lock_recover(&self.inner.state);
        let mut ids: Vec<String> = state.completed.iter().cloned().collect();
        ids.sort_by_key(|id| id_gen::parse_sequence(id).unwrap_or(u64::MAX));
        ids
    }

    /// Fast-path view: every id present in the pool's completed set.
    pub fn are_deps_complete(&self, dependencies: &[String]) -> bool {
        let state = lock_recover(&self.inner.state);
        dependencies.iter().all(|d| state.completed.contains(d))
    }

    pub fn detect_dependency_cycle(&self) -> Option<Vec<String>> {
        self.inner.graph.detect_cycle()
    }

    pub fn graph_statistics(&self) -> GraphStats {
        self.inner.graph.statistics()
    }

    pub fn ready_executions(&self) -> Vec<String> {
        self.inner.graph.get_ready()
    }

    /// The pool's dependency graph. Marking ids completed here unblocks
    /// queued dependents on the next re-scan (`resume_for_key`).
    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    pub fn resource_usage(&self, execution_id: &str) -> Option<ExecutionUsage> {
        let (key, quota) = {
            let state = lock_recover(&self.inner.state);
            let key = state.active.get(execution_id)?.clone();
            (key, state.quotas.get(execution_id).copied())
        };
        Some(ExecutionUsage {
            execution_id: execution_id.to_string(),
            key,
            sample: self.inner.monitor.current_usage(),
            runtime_seconds: self.inner.monitor.runtime_seconds(execution_id),
            quota,
        })
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let stats = self.inner.monitor.memory_stats();
        let sink = &self.inner.metrics;
        sink.gauge_set(
            metrics::MEMORY_USAGE_BYTES,
            &[("type", "rss")],
            stats.rss_mb * 1024.0 * 1024.0,
        );
        sink.gauge_set(
            metrics::MEMORY_USAGE_BYTES,
            &[("type", "heap_used")],
            stats.heap_used_mb * 1024.0 * 1024.0,
        );
        sink.gauge_set(
            metrics::MEMORY_USAGE_BYTES,
            &[("type", "external")],
            stats.external_mb * 1024.0 * 1024.0,
        );
        stats
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.config.max_concurrent
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn publish_gauges(&self) {
        let (active, queued) = {
            let state = lock_recover(&self.inner.state);
            (state.active.len(), state.queue.len())
        };
        self.inner
            .metrics
            .gauge_set(metrics::ACTIVE_EXECUTIONS, &[], active as f64);
        self.inner
            .metrics
            .gauge_set(metrics::QUEUE_DEPTH, &[], queued as f64);
    }
}

// ── Worker lifecycle ──

fn spawn_worker(inner: &Arc<PoolInner>, exec: RunnableExecution) {
    let name = format!(
        "exec-worker-{}",
        id_gen::parse_sequence(&exec.execution_id).unwrap_or(0)
    );
    let inner = inner.clone();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || run_execution(inner, exec))
        .expect("Failed to spawn execution worker thread");
}

fn run_execution(inner: Arc<PoolInner>, exec: RunnableExecution) {
    let RunnableExecution {
        execution_id,
        key,
        job,
        tx,
        quota,
    } = exec;
    let started = Instant::now();
    tracing::info!(%execution_id, %key, "Execution started");

    if inner.config.enable_resource_quotas {
        inner.monitor.start_monitoring(&execution_id);
        if let Some(q) = &quota {
            observe_quota(&inner, &execution_id, &key, q);
        }
    }

    let token = CancellationToken::new();
    let result = match std::panic::catch_unwind(AssertUnwindSafe(|| job(token.clone()))) {
        Ok(result) => result,
        Err(payload) => Err(SchedulerError::Job(panic_message(payload))),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let succeeded = result.is_ok();

    // Unconditional teardown: a broken job must not leak a slot, a
    // baseline, or a quota entry.
    inner.monitor.stop_monitoring(&execution_id);
    let active_len;
    {
        let mut state = lock_recover(&inner.state);
        state.quotas.remove(&execution_id);
        if succeeded {
            state.total_processed += 1;
            state.completed.insert(execution_id.clone());
        } else {
            state.total_failed += 1;
        }
        state.active.remove(&execution_id);
        active_len = state.active.len();
    }
    inner
        .metrics
        .gauge_set(metrics::ACTIVE_EXECUTIONS, &[], active_len as f64);

    if succeeded {
        // Completion must be visible in the graph before any re-scan can
        // consider this execution's dependents.
        if inner.config.enable_dependency_graph {
            inner.graph.mark_completed(&execution_id);
        }
        inner
            .metrics
            .counter_inc(metrics::TASKS_COMPLETED_TOTAL, &[("key", &key)], 1);
        tracing::info!(%execution_id, %key, duration_ms, "Execution complete");
    } else {
        let error = result
            .as_ref()
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        tracing::error!(%execution_id, %key, duration_ms, error = %error, "Execution failed");
    }

    schedule_next(&inner);
    let _ = tx.send(result);
}

/// Start queued work until saturated or nothing is eligible. Selection:
/// deps satisfied, then highest priority rank, then FIFO.
fn schedule_next(inner: &Arc<PoolInner>) {
    loop {
        let (next, wait_ms) = {
            let mut state = lock_recover(&inner.state);
            if state.active.len() >= inner.config.max_concurrent {
                return;
            }

            let mut best: Option<usize> = None;
            for (i, entry) in state.queue.iter().enumerate() {
                let eligible = entry.dependencies.is_empty()
                    || inner.graph.are_deps_satisfied(&entry.execution_id);
                if !eligible {
                    continue;
                }
                best = match best {
                    None => Some(i),
                    Some(j) => {
                        let current = &state.queue[j];
                        let better = entry.priority.rank() > current.priority.rank()
                            || (entry.priority.rank() == current.priority.rank()
                                && entry.queued_at < current.queued_at);
                        if better {
                            Some(i)
                        } else {
                            Some(j)
                        }
                    }
                };
            }

            let Some(i) = best else { return };
            let entry = state.queue.remove(i);
            let wait = entry.queued_at.elapsed();
            state.total_queue_wait += wait;
            state.dequeued += 1;
            state
                .active
                .insert(entry.execution_id.clone(), entry.key.clone());
            let quota = state.quotas.get(&entry.execution_id).copied();

            (
                RunnableExecution {
                    execution_id: entry.execution_id,
                    key: entry.key,
                    job: entry.job,
                    tx: entry.tx,
                    quota,
                },
                wait.as_millis() as f64,
            )
        };

        inner
            .metrics
            .histogram_observe(metrics::QUEUE_WAIT_TIME_MS, &[], wait_ms);
        let (active, queued) = {
            let state = lock_recover(&inner.state);
            (state.active.len(), state.queue.len())
        };
        inner
            .metrics
            .gauge_set(metrics::ACTIVE_EXECUTIONS, &[], active as f64);
        inner
            .metrics
            .gauge_set(metrics::QUEUE_DEPTH, &[], queued as f64);

        tracing::debug!(
            execution_id = %next.execution_id,
            key = %next.key,
            "Execution dequeued"
        );
        spawn_worker(inner, next);
    }
}

// ── Quota observation ──

fn spawn_quota_ticker(inner: &Arc<PoolInner>) {
    let weak = Arc::downgrade(inner);
    let interval = Duration::from_millis(inner.config.quota_check_interval_ms);
    std::thread::Builder::new()
        .name("quota-ticker".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                let Some(inner) = weak.upgrade() else { break };
                quota_tick(&inner);
            }
            tracing::debug!("Quota ticker stopped");
        })
        .expect("Failed to spawn quota ticker thread");
}

fn quota_tick(inner: &Arc<PoolInner>) {
    let checks: Vec<(String, String, ResourceQuota)> = {
        let state = lock_recover(&inner.state);
        state
            .active
            .iter()
            .filter_map(|(id, key)| {
                state
                    .quotas
                    .get(id)
                    .map(|q| (id.clone(), key.clone(), *q))
            })
            .collect()
    };

    for (execution_id, key, quota) in checks {
        observe_quota(inner, &execution_id, &key, &quota);
    }

    let sample = inner.monitor.current_usage();
    inner
        .metrics
        .gauge_set(metrics::CPU_USAGE_PERCENT, &[], sample.cpu_percent);
    inner.metrics.gauge_set(
        metrics::MEMORY_USAGE_BYTES,
        &[("type", "rss")],
        sample.memory_bytes as f64,
    );
}

fn observe_quota(inner: &Arc<PoolInner>, execution_id: &str, key: &str, quota: &ResourceQuota) {
    let eval = inner.monitor.check_quota(execution_id, quota);
    if !eval.any_exceeded {
        return;
    }

    {
        let mut state = lock_recover(&inner.state);
        state.total_quota_violations += 1;
    }
    for violation_type in eval.violation_types() {
        inner.metrics.counter_inc(
            metrics::QUOTA_VIOLATIONS_TOTAL,
            &[("violation_type", violation_type), ("key", key)],
            1,
        );
    }
    tracing::warn!(
        execution_id,
        key,
        violation = eval.violation_message.as_deref().unwrap_or(""),
        "Quota violation observed, execution continues"
    );
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (non-string payload)".to_string()
    }
}

/// Pool sections never run user code (jobs run outside the lock, under
/// catch_unwind); a poisoned state mutex still holds a coherent value.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}
