//! Shared test utilities — job builders and bounded polling.
//!
//! Available only under `#[cfg(test)]`.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::execution::JobFn;

/// Thread-safe append-only log for observing completion order.
#[derive(Clone, Default)]
pub struct OrderLog(Arc<Mutex<Vec<String>>>);

impl OrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Opens a gated job. Dropping the gate unblocks the job too.
pub struct Gate(Sender<()>);

impl Gate {
    pub fn open(&self) {
        let _ = self.0.send(());
    }
}

/// A job that records its start, then blocks until the gate opens.
pub fn gated_job(log: &OrderLog, name: &str) -> (JobFn, Gate) {
    let (tx, rx) = channel::<()>();
    let log = log.clone();
    let name = name.to_string();
    let job: JobFn = Box::new(move |_cancel| {
        log.push(&name);
        let _ = rx.recv();
        Ok(json!(name))
    });
    (job, Gate(tx))
}

/// A job that records its start and resolves immediately.
pub fn recording_job(log: &OrderLog, name: &str) -> JobFn {
    let log = log.clone();
    let name = name.to_string();
    Box::new(move |_cancel| {
        log.push(&name);
        Ok(json!(name))
    })
}

pub fn sleep_job(ms: u64) -> JobFn {
    Box::new(move |_cancel| {
        std::thread::sleep(Duration::from_millis(ms));
        Ok(json!(ms))
    })
}

pub fn failing_job(message: &str) -> JobFn {
    let message = message.to_string();
    Box::new(move |_cancel| Err(SchedulerError::Job(message)))
}

pub fn panicking_job(message: &'static str) -> JobFn {
    Box::new(move |_cancel| panic!("{}", message))
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Pool config for deterministic scheduling tests: quotas off.
pub fn test_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        enable_resource_quotas: false,
        ..Default::default()
    }
}
