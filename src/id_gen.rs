use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Prefixe des identifiants d'execution
pub const EXECUTION_ID_PREFIX: &str = "exec-";

/// Strictly increasing `exec-N` generator, private to one pool instance.
/// N is 1-origin decimal; the format is stable and consumers treat ids
/// opaquely, but N can be parsed back out for ordering tiebreaks in logs.
#[derive(Debug)]
pub struct ExecutionIdGen {
    counter: AtomicU64,
}

impl ExecutionIdGen {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Next execution id: `exec-1`, `exec-2`, ...
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", EXECUTION_ID_PREFIX, n)
    }
}

impl Default for ExecutionIdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract N from an `exec-N` id. None for foreign id shapes.
pub fn parse_sequence(execution_id: &str) -> Option<u64> {
    execution_id
        .strip_prefix(EXECUTION_ID_PREFIX)
        .and_then(|n| n.parse().ok())
}

/// Genere un correlation id pour les logs et metriques (UUID v4 hex, 32 chars)
pub fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let gen = ExecutionIdGen::new();
        assert_eq!(gen.next_id(), "exec-1");
        assert_eq!(gen.next_id(), "exec-2");
        assert_eq!(parse_sequence("exec-2"), Some(2));
    }

    #[test]
    fn test_parse_sequence_rejects_foreign_ids() {
        assert_eq!(parse_sequence("task-9"), None);
        assert_eq!(parse_sequence("exec-"), None);
        assert_eq!(parse_sequence("exec-x"), None);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = correlation_id();
        let b = correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
