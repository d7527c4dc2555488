//! Capacity-1 execution gate.
//!
//! Only one tool invocation may be in flight on the controller thread. A
//! second caller waits up to its budget and then gets [`GateBusy`], which the
//! protocol layer reports as a retryable "server busy" error.

use crate::error::GateBusy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Single-permit semaphore shared by every tool caller.
#[derive(Clone)]
pub struct ExecutionGate {
    permit: Arc<Semaphore>,
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Acquire the permit, waiting no longer than `wait`.
    pub async fn acquire(&self, wait: Duration) -> Result<GatePermit, GateBusy> {
        match tokio::time::timeout(wait, self.permit.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(GatePermit::new(permit)),
            // The semaphore is never closed; treat it as busy all the same.
            Ok(Err(_)) | Err(_) => {
                warn!(?wait, "execution gate busy");
                Err(GateBusy { waited: wait })
            }
        }
    }

    /// Take the permit only if it is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.permit
            .clone()
            .try_acquire_owned()
            .ok()
            .map(GatePermit::new)
    }

    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

/// Held while a tool runs. Dropping it reopens the gate.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl GatePermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: permit,
            acquired_at: Instant::now(),
        }
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        debug!(held_ms = self.held_for().as_millis() as u64, "execution gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_acquire_fails_busy_within_wait() {
        let gate = ExecutionGate::new();
        let _held = gate.acquire(Duration::from_millis(10)).await.unwrap();
        assert!(gate.is_busy());

        let started = Instant::now();
        let busy = gate.acquire(Duration::from_millis(50)).await.err().unwrap();
        assert_eq!(busy.waited, Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn drop_releases_permit() {
        let gate = ExecutionGate::new();
        {
            let _permit = gate.try_acquire().unwrap();
            assert!(gate.try_acquire().is_none());
        }
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn waiter_gets_permit_after_release() {
        let gate = ExecutionGate::new();
        let held = gate.acquire(Duration::from_millis(10)).await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(2)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_never_overlap() {
        let gate = ExecutionGate::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _permit = gate.acquire(Duration::from_secs(5)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
