// === Pool Defaults ===
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_QUOTA_CHECK_INTERVAL_MS: u64 = 5_000;

// === Orchestrator Deadlines ===
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 300_000; // 5 min
pub const DEFAULT_ANALYSIS_TIMEOUT_MS: u64 = 120_000; // 2 min

// === Metric Buckets (ms) ===
pub const EXECUTION_DURATION_BUCKETS_MS: [f64; 9] = [
    100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 120_000.0, 300_000.0,
];
pub const QUEUE_WAIT_BUCKETS_MS: [f64; 8] =
    [10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 30_000.0];

// === Health Scoring ===
pub const HEALTH_SCORE_MAX: f64 = 100.0;

// === Persisted State ===
pub const DATA_DIR_NAME: &str = ".recursivemanager";
pub const ANALYSES_DIR_NAME: &str = "analyses";
