//! Counting semaphore bounding concurrent async operations.
//!
//! Used to cap concurrently open browser sessions during crawl and search
//! fan-out. Waiters are served in FIFO order; a waiter whose
//! [`CancelToken`] fires while queued is removed without perturbing the
//! other queued waiters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use crate::error::CanceledError;

/// Counting semaphore with FIFO waiters and cancelable acquisition.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

struct LockInner {
    max_concurrent: usize,
    state: Mutex<LockState>,
    next_id: AtomicU64,
}

struct LockState {
    /// Active holders. Invariant: `0 <= count <= max_concurrent`.
    count: usize,
    queue: VecDeque<Waiter>,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

/// Permit held while inside the lock. Releases on drop.
pub struct LockPermit {
    inner: Arc<LockInner>,
}

impl Lock {
    /// Create a lock allowing up to `max_concurrent` simultaneous holders.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");
        Self {
            inner: Arc::new(LockInner {
                max_concurrent,
                state: Mutex::new(LockState {
                    count: 0,
                    queue: VecDeque::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of active holders.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().count
    }

    /// Acquire a permit, waiting in FIFO order when the lock is full.
    ///
    /// Returns `Err(CanceledError)` if `cancel` fires before acquisition;
    /// only this waiter is removed from the queue.
    pub async fn acquire(
        &self,
        cancel: Option<&CancelToken>,
    ) -> std::result::Result<LockPermit, CanceledError> {
        if let Some(cancel) = cancel {
            cancel.check()?;
        }

        let (id, rx) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.count < self.inner.max_concurrent && state.queue.is_empty() {
                state.count += 1;
                return Ok(LockPermit {
                    inner: Arc::clone(&self.inner),
                });
            }
            let (tx, rx) = oneshot::channel();
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            state.queue.push_back(Waiter { id, tx });
            (id, rx)
        };

        match cancel {
            None => {
                // The sender is owned by the lock state and is only dropped
                // when this waiter is removed, which needs a cancel token.
                rx.await.expect("lock waiter dropped without cancellation");
                Ok(LockPermit {
                    inner: Arc::clone(&self.inner),
                })
            }
            Some(cancel) => {
                tokio::select! {
                    biased;
                    granted = rx => {
                        granted.expect("lock waiter dropped without cancellation");
                        Ok(LockPermit { inner: Arc::clone(&self.inner) })
                    }
                    _ = cancel.cancelled() => {
                        let mut state = self.inner.state.lock().unwrap();
                        if let Some(pos) = state.queue.iter().position(|w| w.id == id) {
                            state.queue.remove(pos);
                            return Err(CanceledError);
                        }
                        drop(state);
                        // The grant raced with cancellation; hand the slot
                        // back so another waiter can take it.
                        self.inner.release();
                        Err(CanceledError)
                    }
                }
            }
        }
    }

    /// Non-throwing variant of [`acquire`](Self::acquire): returns `None`
    /// when the token cancels while waiting.
    pub async fn try_acquire_or_cancel(&self, cancel: Option<&CancelToken>) -> Option<LockPermit> {
        self.acquire(cancel).await.ok()
    }
}

impl LockInner {
    /// Release one holder and resume the next FIFO waiter if any.
    ///
    /// # Panics
    ///
    /// Panics when called with no active holders; releasing more times than
    /// acquiring is a programming error, not a recoverable condition.
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.count > 0,
            "lock released more times than it was acquired"
        );
        state.count -= 1;
        while state.count < self.max_concurrent {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            state.count += 1;
            if waiter.tx.send(()).is_ok() {
                break;
            }
            // Waiter future was dropped before the grant arrived; take the
            // slot back and try the next one.
            state.count -= 1;
        }
    }
}

impl LockPermit {
    /// Release the permit explicitly. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockPermit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bound_is_never_exceeded() {
        let lock = Lock::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let peak = Arc::clone(&peak);
            let active = Arc::clone(&active);
            tasks.push(tokio::spawn(async move {
                let permit = lock.acquire(None).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                permit.release();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(lock.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fifo_release_order() {
        let lock = Lock::new(1);
        let holder = lock.acquire(None).await.unwrap();

        let served = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for i in 1..=3 {
            let lock = lock.clone();
            let served = Arc::clone(&served);
            tasks.push(tokio::spawn(async move {
                let permit = lock.acquire(None).await.unwrap();
                served.lock().unwrap().push(i);
                permit.release();
            }));
            // Let each waiter enqueue before the next spawns.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        holder.release();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*served.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancel_isolates_one_waiter() {
        let lock = Lock::new(1);
        let holder = lock.acquire(None).await.unwrap();

        let cancel_w2 = CancelToken::new();
        let served = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for (i, cancel) in [(1, None), (2, Some(cancel_w2.clone())), (3, None)] {
            let lock = lock.clone();
            let served = Arc::clone(&served);
            tasks.push(tokio::spawn(async move {
                match lock.acquire(cancel.as_ref()).await {
                    Ok(permit) => {
                        served.lock().unwrap().push(i);
                        permit.release();
                        true
                    }
                    Err(CanceledError) => false,
                }
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel_w2.cancel_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        holder.release();

        let results: Vec<bool> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results, vec![true, false, true]);
        assert_eq!(*served.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_two_resolve_immediately_third_waits_for_release() {
        let lock = Lock::new(2);

        let first = lock.acquire(None).await.unwrap();
        let second = lock.acquire(None).await.unwrap();
        assert_eq!(lock.active_count(), 2);

        let lock2 = lock.clone();
        let third = tokio::spawn(async move {
            let permit = lock2.acquire(None).await.unwrap();
            permit.release();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!third.is_finished(), "third acquisition must wait");

        first.release();
        third.await.unwrap();
        second.release();
        assert_eq!(lock.active_count(), 0);
    }

    #[tokio::test]
    async fn test_try_acquire_or_cancel_returns_none() {
        let lock = Lock::new(1);
        let holder = lock.acquire(None).await.unwrap();

        let cancel = CancelToken::new();
        cancel.cancel_after(Duration::from_millis(20));

        let permit = lock.try_acquire_or_cancel(Some(&cancel)).await;
        assert!(permit.is_none());
        holder.release();
    }

    #[test]
    #[should_panic(expected = "released more times")]
    fn test_over_release_panics() {
        let lock = Lock::new(1);
        lock.inner.release();
    }
}
