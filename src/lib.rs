//! Recursive Manager — execution scheduling for long-running agent jobs.
//!
//! Single-crate library providing a bounded worker pool with priority and
//! dependency aware admission, per-key mutual exclusion, resource quota
//! observation and Prometheus metrics, composed behind one orchestrated
//! submit entry point.

// Foundation
pub mod constants;
pub mod error;
pub mod id_gen;
pub mod time_utils;

// Core types
pub mod config;
pub mod execution;
pub mod quota;

// Sub-systems
pub mod analysis_store;
pub mod graph;
pub mod health;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod tracing_init;

#[cfg(test)]
pub mod test_helpers;

// Re-exports for convenience
pub use error::{SchedulerError, SchedulerResult};
pub use execution::{
    AgentState, CancellationToken, ExecutionMode, ExecutionPriority, JobFn, JobResult,
    SubmitOptions,
};
pub use graph::DependencyGraph;
pub use lock::{AgentLock, AgentLockGuard};
pub use orchestrator::{
    AgentContextLoader, AgentJobContext, AgentJobFn, AgentStatusLookup, Orchestrator,
};
pub use pool::{ExecutionHandle, ExecutionPool, PoolStats};
pub use quota::{QuotaEvaluation, ResourceQuota, ResourceSample};
