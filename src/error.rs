use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid agent key: {0}")]
    InvalidKey(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Agent already running: {0}")]
    AlreadyRunning(String),

    #[error("Execution timed out after {0} ms")]
    Timeout(u64),

    #[error("Queue cleared")]
    QueueCleared,

    #[error("Queued work cancelled: agent '{0}' paused")]
    PauseCancelled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
