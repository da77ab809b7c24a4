//! Write-phase mutual exclusion between the refresh and detection
//! cycles.
//!
//! Both cycles mutate overlapping match rows; interleaving their writes
//! could resurrect a transition one of them just applied or double-count
//! upsert statistics. The lock is an explicit dependency handed to both
//! services rather than a module-level global. A cycle that finds the
//! lock held waits its turn; it never skips its run.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct CycleLock {
    inner: Arc<Mutex<()>>,
}

impl CycleLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire for the duration of a cycle's write phase. Held via the
    /// returned guard; dropping it releases the lock.
    pub async fn acquire(&self) -> CycleGuard<'_> {
        CycleGuard {
            _guard: self.inner.lock().await,
        }
    }
}

pub struct CycleGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn cycles_serialize_through_the_lock() {
        let lock = CycleLock::new();
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire().await;
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiting_cycle_runs_after_release() {
        let lock = CycleLock::new();
        let guard = lock.acquire().await;

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            let _guard = lock2.acquire().await;
            true
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
