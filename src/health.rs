//! Health scoring — per-key outcome ratios exported as a 0-100 gauge.
//!
//! Timeouts and rejections count as failures; the score is the success
//! share of everything the orchestrator has run for the key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::constants::HEALTH_SCORE_MAX;
use crate::metrics::{self, MetricsSink};

#[derive(Debug, Default, Clone, Copy)]
struct KeyOutcomes {
    succeeded: u64,
    failed: u64,
}

impl KeyOutcomes {
    fn score(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            return HEALTH_SCORE_MAX;
        }
        HEALTH_SCORE_MAX * self.succeeded as f64 / total as f64
    }
}

#[derive(Default)]
pub struct HealthTracker {
    outcomes: Mutex<HashMap<String, KeyOutcomes>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal outcome and refresh the key's gauge.
    pub fn record(&self, key: &str, succeeded: bool, sink: &Arc<dyn MetricsSink>) {
        let score = {
            let mut outcomes = match self.outcomes.lock() {
                Ok(guard) => guard,
                Err(poison) => poison.into_inner(),
            };
            let entry = outcomes.entry(key.to_string()).or_default();
            if succeeded {
                entry.succeeded += 1;
            } else {
                entry.failed += 1;
            }
            entry.score()
        };
        sink.gauge_set(metrics::HEALTH_SCORE, &[("key", key)], score);
    }

    /// Current score for a key. Unknown keys are healthy by definition.
    pub fn score(&self, key: &str) -> f64 {
        let outcomes = match self.outcomes.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        outcomes.get(key).map(|o| o.score()).unwrap_or(HEALTH_SCORE_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    #[test]
    fn test_score_tracks_success_share() {
        let tracker = HealthTracker::new();
        let sink: Arc<dyn MetricsSink> = Arc::new(NoopMetrics);
        assert_eq!(tracker.score("a"), 100.0);

        tracker.record("a", true, &sink);
        tracker.record("a", true, &sink);
        tracker.record("a", false, &sink);
        assert!((tracker.score("a") - 200.0 / 3.0).abs() < 1e-9);

        // Keys are independent.
        tracker.record("b", false, &sink);
        assert_eq!(tracker.score("b"), 0.0);
        assert!(tracker.score("a") > 0.0);
    }
}
