//! Agent Lock — per-key mutual exclusion with FIFO fairness.
//!
//! Each key maps to a ticket-queue mutex: `acquire` waiters are served in
//! arrival order, and `try_acquire` is a single atomic check-and-set under
//! the key's own lock (held, or anyone waiting, means None). No ordering
//! is defined across different keys.
//!
//! Per-key state is created lazily and never evicted on its own; hosts
//! that retire keys must call `cleanup` or the map grows for the life of
//! the process.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Default)]
struct KeyState {
    locked: bool,
    next_ticket: u64,
    waiters: VecDeque<u64>,
}

#[derive(Default)]
struct KeyLock {
    state: Mutex<KeyState>,
    cond: Condvar,
}

impl KeyLock {
    fn unlock(&self) {
        let mut state = lock_recover(&self.state);
        state.locked = false;
        drop(state);
        self.cond.notify_all();
    }
}

/// Releases the key exactly once, on drop or via `release`.
pub struct AgentLockGuard {
    key: String,
    lock: Arc<KeyLock>,
    released: bool,
}

impl AgentLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Explicit release. Equivalent to dropping the guard.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.unlock();
        }
    }
}

impl Drop for AgentLockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Map of agent key to a FIFO fair mutex.
#[derive(Default)]
pub struct AgentLock {
    locks: Mutex<HashMap<String, Arc<KeyLock>>>,
}

impl AgentLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the key's mutex is free, FIFO among waiters.
    /// Empty/blank keys fail fast with `InvalidKey`.
    pub fn acquire(&self, key: &str) -> SchedulerResult<AgentLockGuard> {
        let lock = self.key_lock(key)?;

        let mut state = lock_recover(&lock.state);
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        while state.locked || state.waiters.front() != Some(&ticket) {
            state = match lock.cond.wait(state) {
                Ok(guard) => guard,
                Err(poison) => poison.into_inner(),
            };
        }
        state.waiters.pop_front();
        state.locked = true;
        drop(state);

        Ok(AgentLockGuard {
            key: key.to_string(),
            lock,
            released: false,
        })
    }

    /// Non-blocking acquire. None when the mutex is held or any waiter is
    /// queued ahead — two concurrent callers can never both win.
    pub fn try_acquire(&self, key: &str) -> SchedulerResult<Option<AgentLockGuard>> {
        let lock = self.key_lock(key)?;

        let mut state = lock_recover(&lock.state);
        if state.locked || !state.waiters.is_empty() {
            return Ok(None);
        }
        state.locked = true;
        drop(state);

        Ok(Some(AgentLockGuard {
            key: key.to_string(),
            lock,
            released: false,
        }))
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let locks = lock_recover(&self.locks);
        locks
            .get(key)
            .map(|l| lock_recover(&l.state).locked)
            .unwrap_or(false)
    }

    /// Drop the per-key state. Intended for retired keys only: a guard
    /// that is still alive keeps its own handle and releases harmlessly,
    /// but a fresh acquire for the same key starts from a clean mutex.
    pub fn cleanup(&self, key: &str) {
        let mut locks = lock_recover(&self.locks);
        if locks.remove(key).is_some() {
            tracing::debug!(key, "Agent lock state removed");
        }
    }

    pub fn mutex_count(&self) -> usize {
        lock_recover(&self.locks).len()
    }

    pub fn clear_all(&self) {
        let mut locks = lock_recover(&self.locks);
        let count = locks.len();
        locks.clear();
        if count > 0 {
            tracing::debug!(count, "All agent lock state cleared");
        }
    }

    fn key_lock(&self, key: &str) -> SchedulerResult<Arc<KeyLock>> {
        if key.trim().is_empty() {
            return Err(SchedulerError::InvalidKey(format!("{:?}", key)));
        }
        let mut locks = lock_recover(&self.locks);
        Ok(locks.entry(key.to_string()).or_default().clone())
    }
}

/// Lock sections here never run user code; a poisoned mutex still holds a
/// coherent value.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_invalid_key_fails_fast() {
        let locks = AgentLock::new();
        assert!(matches!(
            locks.acquire(""),
            Err(SchedulerError::InvalidKey(_))
        ));
        assert!(matches!(
            locks.try_acquire("   "),
            Err(SchedulerError::InvalidKey(_))
        ));
        assert_eq!(locks.mutex_count(), 0);
    }

    #[test]
    fn test_release_restores_pre_state() {
        let locks = AgentLock::new();
        let guard = locks.acquire("a").unwrap();
        assert!(locks.is_locked("a"));
        guard.release();
        assert!(!locks.is_locked("a"));

        // Reacquirable immediately, including via try_acquire.
        let guard = locks.try_acquire("a").unwrap();
        assert!(guard.is_some());
    }

    #[test]
    fn test_try_acquire_excludes_holder_and_waiters() {
        let locks = Arc::new(AgentLock::new());
        let guard = locks.acquire("a").unwrap();
        assert!(locks.try_acquire("a").unwrap().is_none());

        // Park a blocking waiter, then release the holder; until the
        // waiter wins, try_acquire must keep losing.
        let locks2 = locks.clone();
        let waiter = std::thread::spawn(move || {
            let g = locks2.acquire("a").unwrap();
            std::thread::sleep(Duration::from_millis(50));
            drop(g);
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(locks.try_acquire("a").unwrap().is_none());
        drop(guard);

        waiter.join().unwrap();
        assert!(!locks.is_locked("a"));
    }

    #[test]
    fn test_concurrent_try_acquire_single_winner() {
        let locks = Arc::new(AgentLock::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if let Some(guard) = locks.try_acquire("x").unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        drop(guard);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(!locks.is_locked("x"));
    }

    #[test]
    fn test_acquire_is_fifo() {
        let locks = Arc::new(AgentLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = locks.acquire("a").unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(std::thread::spawn(move || {
                let guard = locks.acquire("a").unwrap();
                order.lock().unwrap().push(i);
                drop(guard);
            }));
            // Ensure waiter i is queued before waiter i+1 arrives.
            std::thread::sleep(Duration::from_millis(30));
        }

        drop(first);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cleanup_and_counts() {
        let locks = AgentLock::new();
        drop(locks.acquire("a").unwrap());
        drop(locks.acquire("b").unwrap());
        assert_eq!(locks.mutex_count(), 2);

        locks.cleanup("a");
        assert_eq!(locks.mutex_count(), 1);
        locks.clear_all();
        assert_eq!(locks.mutex_count(), 0);
    }
}
