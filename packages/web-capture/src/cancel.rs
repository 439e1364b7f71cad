//! Cooperative cancellation token with listener fan-out.
//!
//! A [`CancelToken`] is created per logical operation tree and threaded
//! through every pipeline call. Cancellation is cooperative: pipelines call
//! [`CancelToken::check`] at well-defined points after each await rather
//! than being preempted mid-flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::error::CanceledError;

type Listener = Box<dyn FnOnce() + Send>;

/// Cooperative cancellation signal.
///
/// Cheap to clone; all clones share the same state. A token is canceled at
/// most once and is immutable after cancellation: the listener list is
/// released and later registrations are no-ops (or schedule-once for the
/// next-tick variants).
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    canceled: AtomicBool,
    /// `None` after cancellation; the list cannot grow back.
    listeners: Mutex<Option<Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

/// Handle returned by [`CancelToken::subscribe`] that removes the listener
/// when no longer wanted. Dropping the subscription does NOT unsubscribe.
pub struct CancelSubscription {
    inner: Arc<Inner>,
    id: u64,
}

impl CancelSubscription {
    /// Remove the listener. No-op if the token already canceled.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.inner.listeners.lock().unwrap().as_mut() {
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a new, un-canceled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                listeners: Mutex::new(Some(Vec::new())),
                next_id: AtomicU64::new(1),
                tx,
                rx,
            }),
        }
    }

    /// True once the token has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// The same as [`on_cancel`](Self::on_cancel) except a subscription is
    /// returned that can be used to remove the listener.
    pub fn subscribe(&self, listener: impl FnOnce() + Send + 'static) -> CancelSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(listeners) = self.inner.listeners.lock().unwrap().as_mut() {
            listeners.push((id, Box::new(listener)));
        }
        CancelSubscription {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Register a listener to run when the token is canceled.
    ///
    /// If the token is already canceled the listener is not called and is
    /// not registered.
    pub fn on_cancel(&self, listener: impl FnOnce() + Send + 'static) {
        if let Some(listeners) = self.inner.listeners.lock().unwrap().as_mut() {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            listeners.push((id, Box::new(listener)));
        }
    }

    /// Register a listener to run when the token is canceled.
    ///
    /// If the token is already canceled the listener is scheduled onto the
    /// runtime and runs on a later tick, never synchronously within this
    /// call.
    pub fn on_cancel_or_next_tick(&self, listener: impl FnOnce() + Send + 'static) {
        let mut guard = self.inner.listeners.lock().unwrap();
        match guard.as_mut() {
            Some(listeners) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                listeners.push((id, Box::new(listener)));
            }
            None => {
                drop(guard);
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    listener();
                });
            }
        }
    }

    /// Cancel the token now. Idempotent: a second call does nothing.
    ///
    /// Listeners run in insertion order; a panicking listener does not
    /// prevent the remaining listeners from running.
    pub fn cancel_now(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = self.inner.listeners.lock().unwrap().take();
        let _ = self.inner.tx.send(true);
        if let Some(listeners) = listeners {
            for (_, listener) in listeners {
                if catch_unwind(AssertUnwindSafe(listener)).is_err() {
                    warn!("cancel listener panicked");
                }
            }
        }
    }

    /// Cancel the token after the given delay.
    pub fn cancel_after(&self, delay: Duration) {
        if self.is_canceled() {
            return;
        }
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel_now();
        });
    }

    /// Return `Err(CanceledError)` if the token has been canceled.
    pub fn check(&self) -> std::result::Result<(), CanceledError> {
        if self.is_canceled() {
            Err(CanceledError)
        } else {
            Ok(())
        }
    }

    /// Resolve when the token is canceled; resolves immediately if the
    /// token is already canceled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.rx.clone();
        // wait_for checks the current value first, so an already-canceled
        // token resolves without suspending.
        let _ = rx.wait_for(|canceled| *canceled).await;
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[tokio::test]
    async fn test_cancel_idempotent() {
        let token = CancelToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel_now();
        token.cancel_now();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(token.check().is_err());
        assert!(token.check().is_err());
    }

    #[tokio::test]
    async fn test_listener_order_and_panic_isolation() {
        let token = CancelToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        token.on_cancel(move || o.lock().unwrap().push(1));
        token.on_cancel(|| panic!("listener failure"));
        let o = Arc::clone(&order);
        token.on_cancel(move || o.lock().unwrap().push(3));

        token.cancel_now();

        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_post_cancel_registration_is_noop() {
        let token = CancelToken::new();
        token.cancel_now();

        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        token.on_cancel(move || f.store(true, Ordering::SeqCst));

        // A second cancel must not run late registrations either.
        token.cancel_now();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_next_tick_on_canceled_token_is_async() {
        let token = CancelToken::new();
        token.cancel_now();

        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        token.on_cancel_or_next_tick(move || f.store(true, Ordering::SeqCst));

        // Not synchronous within the same call stack.
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let f = Arc::clone(&fired);
        let sub = token.subscribe(move || f.store(true, Ordering::SeqCst));
        sub.unsubscribe();

        token.cancel_now();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_after_resolves_promise() {
        let token = CancelToken::new();
        let start = Instant::now();

        token.cancel_after(Duration::from_millis(50));
        token.cancelled().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(45), "resolved too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "resolved too late: {elapsed:?}");
        assert!(token.is_canceled());

        // Already canceled: resolves immediately.
        let start = Instant::now();
        token.cancelled().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
