//! Single-flight guard so scheduled and manual runs never overlap.
//!
//! The atomic flag covers tasks inside one process. A `RunLock` extends the
//! guard across processes sharing a database (`sieve schedule` alongside a
//! manual `sieve run`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tracing::{error, warn};

use sieve_common::RunLockStore;

/// Lock shared by pipeline runs and standalone thread detection.
pub const PIPELINE_LOCK: &str = "pipeline";
pub const DIGEST_LOCK: &str = "digest";

/// A lock older than this belongs to a process that died mid-run.
const DEFAULT_STALE_AFTER_HOURS: i64 = 3;

/// A named lock row in the shared store.
#[derive(Clone)]
pub struct RunLock {
    store: Arc<dyn RunLockStore>,
    name: &'static str,
    stale_after: Duration,
}

impl RunLock {
    pub fn new(store: Arc<dyn RunLockStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            stale_after: Duration::hours(DEFAULT_STALE_AFTER_HOURS),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn try_acquire(&self) -> Result<bool> {
        self.store
            .try_lock(self.name, self.stale_after)
            .await
            .with_context(|| format!("Failed to check {} lock", self.name))
    }

    async fn release(&self) {
        if let Err(e) = self.store.unlock(self.name).await {
            error!(lock = self.name, error = %e, "Failed to release run lock");
        }
    }
}

#[derive(Default)]
pub struct RunGuard {
    running: AtomicBool,
    lock: Option<RunLock>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard that also claims `lock`, so other processes see the run.
    pub fn shared(lock: RunLock) -> Self {
        Self {
            running: AtomicBool::new(false),
            lock: Some(lock),
        }
    }

    /// Claim the guard. Returns false if a run is already in progress.
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the in-process flag for the lifetime of the returned permit.
    pub fn acquire(&self) -> Option<RunPermit<'_>> {
        self.try_start().then_some(RunPermit {
            guard: self,
            lock: None,
        })
    }

    /// Claim the flag, then the shared lock if one is configured.
    /// `Ok(None)` means a run is already in progress here or elsewhere.
    pub async fn acquire_shared(&self) -> Result<Option<RunPermit<'_>>> {
        let Some(mut permit) = self.acquire() else {
            return Ok(None);
        };
        let Some(lock) = &self.lock else {
            return Ok(Some(permit));
        };
        if !lock.try_acquire().await? {
            return Ok(None);
        }
        permit.lock = Some(lock);
        Ok(Some(permit))
    }
}

/// Releases its guard when dropped, including on early return and unwind.
///
/// Call `release` on the normal path so the shared lock is cleared before the
/// next trigger; a dropped permit hands the unlock to a background task.
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct RunPermit<'a> {
    guard: &'a RunGuard,
    lock: Option<&'a RunLock>,
}

impl RunPermit<'_> {
    pub async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release().await;
        }
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let lock = lock.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { lock.release().await });
                }
                Err(_) => warn!(
                    lock = lock.name(),
                    "No runtime to release run lock; it will expire"
                ),
            }
        }
        self.guard.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use sieve_store::MemoryStore;

    use super::*;

    #[test]
    fn second_start_fails_until_finish() {
        let guard = RunGuard::new();
        assert!(guard.try_start());
        assert!(!guard.try_start());
        assert!(guard.is_running());
        guard.finish();
        assert!(!guard.is_running());
        assert!(guard.try_start());
    }

    #[test]
    fn concurrent_starts_have_exactly_one_winner() {
        for _ in 0..50 {
            let guard = Arc::new(RunGuard::new());
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let guard = guard.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        guard.try_start()
                    })
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count();
            assert_eq!(wins, 1);
        }
    }

    #[test]
    fn permit_releases_on_drop() {
        let guard = RunGuard::new();
        {
            let _permit = guard.acquire().unwrap();
            assert!(guard.acquire().is_none());
        }
        assert!(!guard.is_running());
    }

    #[test]
    fn permit_releases_on_panic() {
        let guard = RunGuard::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = guard.acquire().unwrap();
            panic!("stage blew up");
        }));
        assert!(result.is_err());
        assert!(!guard.is_running());
    }

    #[tokio::test]
    async fn shared_lock_blocks_a_second_process() {
        let store = Arc::new(MemoryStore::new());
        let here = RunGuard::shared(RunLock::new(store.clone(), PIPELINE_LOCK));
        let elsewhere = RunGuard::shared(RunLock::new(store.clone(), PIPELINE_LOCK));

        let permit = here.acquire_shared().await.unwrap().unwrap();
        assert!(store.is_locked(PIPELINE_LOCK));
        assert!(elsewhere.acquire_shared().await.unwrap().is_none());
        // The losing guard leaves its own flag clear.
        assert!(!elsewhere.is_running());

        permit.release().await;
        assert!(!here.is_running());
        assert!(!store.is_locked(PIPELINE_LOCK));
        assert!(elsewhere.acquire_shared().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_permit_releases_shared_lock() {
        let store = Arc::new(MemoryStore::new());
        let guard = RunGuard::shared(RunLock::new(store.clone(), PIPELINE_LOCK));
        {
            let _permit = guard.acquire_shared().await.unwrap().unwrap();
        }
        assert!(!guard.is_running());
        for _ in 0..10 {
            if !store.is_locked(PIPELINE_LOCK) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!store.is_locked(PIPELINE_LOCK));
    }

    #[tokio::test]
    async fn unshared_guard_needs_no_store() {
        let guard = RunGuard::new();
        let permit = guard.acquire_shared().await.unwrap().unwrap();
        assert!(guard.acquire_shared().await.unwrap().is_none());
        permit.release().await;
        assert!(!guard.is_running());
    }
}
