//! Orchestrator — the single submission entry point.
//!
//! Scheduling stays delegated to the pool so the global concurrency cap
//! is enforced globally. Inside the job the pool runs, the orchestrator
//! adds what the pool deliberately does not know about: per-key mutual
//! exclusion, the agent-status precondition, context loading, the
//! deadline race, metric emission and health recording.
//!
//! A deadline that elapses does NOT kill the job body: the submitter gets
//! `Timeout`, the cancel token is signalled for cooperative jobs, and the
//! body finishes on its own detached thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::analysis_store::AnalysisStore;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::{
    AgentState, CancellationToken, ExecutionMode, JobFn, JobResult, SubmitOptions,
};
use crate::health::HealthTracker;
use crate::id_gen;
use crate::lock::AgentLock;
use crate::metrics::{self, MetricsSink, PrometheusMetrics};
use crate::pool::{ExecutionHandle, ExecutionPool};

/// How the host reports an agent's lifecycle state.
pub trait AgentStatusLookup: Send + Sync {
    fn status(&self, key: &str) -> AgentState;
}

/// How the host materializes the context a job body needs.
pub trait AgentContextLoader: Send + Sync {
    fn load(&self, key: &str) -> SchedulerResult<Value>;
}

/// Everything an orchestrated job body receives.
pub struct AgentJobContext {
    pub key: String,
    pub correlation_id: String,
    pub context: Value,
    pub cancel: CancellationToken,
}

pub type AgentJobFn = Box<dyn FnOnce(AgentJobContext) -> JobResult + Send + 'static>;

pub struct Orchestrator {
    pool: Arc<ExecutionPool>,
    locks: Arc<AgentLock>,
    status: Arc<dyn AgentStatusLookup>,
    loader: Arc<dyn AgentContextLoader>,
    metrics: Arc<dyn MetricsSink>,
    health: Arc<HealthTracker>,
    analysis_store: Option<Arc<AnalysisStore>>,
    config: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<ExecutionPool>,
        locks: Arc<AgentLock>,
        status: Arc<dyn AgentStatusLookup>,
        loader: Arc<dyn AgentContextLoader>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let config = pool.config().clone();
        Self {
            pool,
            locks,
            status,
            loader,
            metrics,
            health: Arc::new(HealthTracker::new()),
            analysis_store: None,
            config,
        }
    }

    /// Everything wired up from one config: pool and orchestrator share a
    /// fresh Prometheus registry and a fresh keyed lock.
    pub fn with_defaults(
        config: SchedulerConfig,
        status: Arc<dyn AgentStatusLookup>,
        loader: Arc<dyn AgentContextLoader>,
    ) -> Self {
        let sink: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics::new());
        let pool = Arc::new(ExecutionPool::with_metrics(config, sink.clone()));
        Self::new(pool, Arc::new(AgentLock::new()), status, loader, sink)
    }

    /// Persist successful analysis-mode results through `store`.
    pub fn with_analysis_store(mut self, store: AnalysisStore) -> Self {
        self.analysis_store = Some(Arc::new(store));
        self
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    pub fn locks(&self) -> &AgentLock {
        &self.locks
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Submit with default options.
    pub fn submit(
        &self,
        key: &str,
        mode: ExecutionMode,
        job: AgentJobFn,
    ) -> SchedulerResult<ExecutionHandle> {
        self.submit_with(key, mode, SubmitOptions::default(), job)
    }

    /// Submit one orchestrated execution. The handle resolves with the
    /// job's own result, or with `AlreadyRunning` / `InvalidState` /
    /// `Timeout` from the orchestration wrapper.
    pub fn submit_with(
        &self,
        key: &str,
        mode: ExecutionMode,
        opts: SubmitOptions,
        job: AgentJobFn,
    ) -> SchedulerResult<ExecutionHandle> {
        let key_owned = key.to_string();
        let locks = self.locks.clone();
        let status = self.status.clone();
        let loader = self.loader.clone();
        let sink = self.metrics.clone();
        let health = self.health.clone();
        let store = self.analysis_store.clone();
        let timeout = self.config.timeout_for(mode);

        let wrapped: JobFn = Box::new(move |cancel| {
            let correlation_id = id_gen::correlation_id();
            let span = tracing::info_span!(
                "agent_execution",
                key = %key_owned,
                %correlation_id,
                mode = %mode
            );
            let _enter = span.enter();
            let started = Instant::now();

            let result = run_guarded(
                &key_owned,
                &correlation_id,
                timeout,
                cancel,
                &locks,
                &*status,
                &*loader,
                job,
            );

            let duration_ms = started.elapsed().as_millis() as f64;
            let outcome = outcome_label(&result);
            sink.counter_inc(
                metrics::EXECUTIONS_TOTAL,
                &[
                    ("mode", mode.as_str()),
                    ("status", outcome),
                    ("key", &key_owned),
                ],
                1,
            );
            sink.histogram_observe(
                metrics::EXECUTION_DURATION_MS,
                &[("mode", mode.as_str()), ("key", &key_owned)],
                duration_ms,
            );

            if mode == ExecutionMode::Analysis {
                sink.counter_inc(
                    metrics::ANALYSIS_EXECUTIONS_TOTAL,
                    &[("status", outcome), ("key", &key_owned)],
                    1,
                );
                sink.histogram_observe(
                    metrics::ANALYSIS_DURATION_MS,
                    &[("key", &key_owned)],
                    duration_ms,
                );
                if let (Ok(value), Some(store)) = (&result, &store) {
                    if let Err(e) = store.save(&key_owned, value) {
                        tracing::warn!(error = %e, "Failed to persist analysis result");
                    }
                }
            }

            health.record(&key_owned, result.is_ok(), &sink);
            result
        });

        self.pool.submit_with(key, opts, wrapped)
    }
}

/// The guarded section: keyed lock, precondition, context, deadline race.
/// The lock guard is released on every exit path when it drops.
#[allow(clippy::too_many_arguments)]
fn run_guarded(
    key: &str,
    correlation_id: &str,
    timeout: Duration,
    cancel: CancellationToken,
    locks: &AgentLock,
    status: &dyn AgentStatusLookup,
    loader: &dyn AgentContextLoader,
    job: AgentJobFn,
) -> JobResult {
    // The pool may legitimately put the same key on two slots; the keyed
    // mutex turns that into an observable error instead of a silent wait.
    let _guard = match locks.try_acquire(key)? {
        Some(guard) => guard,
        None => {
            tracing::warn!("Key already holds its mutex, rejecting");
            return Err(SchedulerError::AlreadyRunning(key.to_string()));
        }
    };

    let state = status.status(key);
    if state != AgentState::Active {
        tracing::warn!(status = %state, "Agent not active, rejecting");
        return Err(SchedulerError::InvalidState(format!(
            "agent '{}' is not active (status: {})",
            key, state
        )));
    }

    let context = loader.load(key)?;
    let job_context = AgentJobContext {
        key: key.to_string(),
        correlation_id: correlation_id.to_string(),
        context,
        cancel: cancel.clone(),
    };

    let (tx, rx) = mpsc::channel::<JobResult>();
    std::thread::Builder::new()
        .name(format!("job-runner-{}", &correlation_id[..8.min(correlation_id.len())]))
        .spawn(move || {
            let _ = tx.send(job(job_context));
        })
        .expect("Failed to spawn job runner thread");

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            cancel.cancel();
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Deadline elapsed; job body continues detached"
            );
            Err(SchedulerError::Timeout(timeout.as_millis() as u64))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(SchedulerError::Job(
            "job runner terminated without a result".to_string(),
        )),
    }
}

fn outcome_label(result: &JobResult) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(SchedulerError::Timeout(_)) => "timeout",
        Err(SchedulerError::AlreadyRunning(_)) => "rejected",
        Err(SchedulerError::InvalidState(_)) => "not_active",
        Err(_) => "error",
    }
}
