//! Execution domain types — priorities, modes, cancellation, job signatures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::quota::ResourceQuota;

// ── Priority ──

/// Scheduling priority. The rank (1-4) is the only thing the scheduler's
/// selection step looks at; ties break FIFO on queue timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl ExecutionPriority {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for ExecutionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Unknown execution priority: {}", s)),
        }
    }
}

impl Default for ExecutionPriority {
    fn default() -> Self {
        Self::Medium
    }
}

// ── Mode ──

/// What kind of work the orchestrator is running. Determines the deadline
/// (`max_execution_time_ms` vs `max_analysis_time_ms`) and metric labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Execution,
    Analysis,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Agent state (orchestrator precondition) ──

/// Lifecycle state of the agent that owns a key, as reported by the host's
/// status lookup. Only `Active` agents accept new submissions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Paused,
    Stopped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cancellation ──

/// Cooperative cancel signal handed to every job function. The pool never
/// kills a running job; a job that wants to honor cancellation polls
/// `is_cancelled()` at its own checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

// ── Job signatures ──

/// What a job resolves with.
pub type JobResult = Result<serde_json::Value, SchedulerError>;

/// The opaque job body the pool runs. Receives a cooperative cancel token;
/// the result (or error) is propagated verbatim to the submitter.
pub type JobFn = Box<dyn FnOnce(CancellationToken) -> JobResult + Send + 'static>;

// ── Submission options ──

/// Optional knobs for one submission. `Default` gives medium priority,
/// no dependencies, no quota.
#[derive(Default)]
pub struct SubmitOptions {
    pub priority: ExecutionPriority,
    pub dependencies: Vec<String>,
    pub quota: Option<ResourceQuota>,
}

impl SubmitOptions {
    pub fn with_priority(priority: ExecutionPriority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn with_dependencies(dependencies: Vec<String>) -> Self {
        Self {
            dependencies,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ranks() {
        assert!(ExecutionPriority::Urgent.rank() > ExecutionPriority::High.rank());
        assert!(ExecutionPriority::High.rank() > ExecutionPriority::Medium.rank());
        assert!(ExecutionPriority::Medium.rank() > ExecutionPriority::Low.rank());
        assert_eq!(ExecutionPriority::default(), ExecutionPriority::Medium);
    }

    #[test]
    fn test_priority_string_roundtrip() {
        for p in [
            ExecutionPriority::Low,
            ExecutionPriority::Medium,
            ExecutionPriority::High,
            ExecutionPriority::Urgent,
        ] {
            assert_eq!(p.as_str().parse::<ExecutionPriority>().unwrap(), p);
        }
        assert!("critical".parse::<ExecutionPriority>().is_err());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
