//! Cancellation utilities
//!
//! A [`CancelHandle`] is shared by everyone taking part in one execution.
//! Long-running operations register cleanup callbacks on it and get back a
//! [`Dispose`]; cancelling the handle runs every cleanup that is still
//! registered, each at most once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;

type Cleanup = Box<dyn FnOnce() + Send>;
type Reporter = Arc<dyn Fn(&str) + Send + Sync>;

struct Inner {
    token: CancellationToken,
    next_id: AtomicU64,
    // keyed by registration id so cancellation runs them in registration order
    cleanups: Mutex<BTreeMap<u64, Cleanup>>,
    reporter: Option<Reporter>,
}

impl Inner {
    fn cleanups(&self) -> MutexGuard<'_, BTreeMap<u64, Cleanup>> {
        // a panicking cleanup never runs while the lock is held
        self.cleanups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A handle that can be used to request cancellation.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .field("registered", &self.inner.cleanups().len())
            .finish()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a handle whose [`report`](Self::report) messages are also
    /// forwarded to `reporter`.
    pub fn with_reporter(reporter: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self::build(Some(Arc::new(reporter)))
    }

    fn build(reporter: Option<Reporter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                next_id: AtomicU64::new(0),
                cleanups: Mutex::new(BTreeMap::new()),
                reporter,
            }),
        }
    }

    /// Register a cleanup to run on cancellation.
    ///
    /// If the handle is already cancelled the cleanup runs immediately and
    /// the returned [`Dispose`] is inert.
    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) -> Dispose {
        if self.is_cancelled() {
            cleanup();
            return Dispose::inert();
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.cleanups().insert(id, Box::new(cleanup));
        // cancel() may have drained the map between the check and the insert
        if self.is_cancelled() {
            let late = self.inner.cleanups().remove(&id);
            if let Some(cleanup) = late {
                cleanup();
            }
            return Dispose::inert();
        }
        Dispose {
            owner: Arc::downgrade(&self.inner),
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Request cancellation and run every registered cleanup once.
    ///
    /// Calling this again is a no-op.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let drained = std::mem::take(&mut *self.inner.cleanups());
        if !drained.is_empty() {
            tracing::debug!(target: "regionflow::progress", cleanups = drained.len(), "running cancellation cleanups");
        }
        for cleanup in drained.into_values() {
            cleanup();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Underlying token, for `select!` in spawned tasks.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Number of cleanups still waiting for cancellation.
    pub fn registered(&self) -> usize {
        self.inner.cleanups().len()
    }

    /// Report progress of the current execution.
    pub fn report(&self, message: &str) {
        tracing::info!(target: "regionflow::progress", "{message}");
        if let Some(reporter) = &self.inner.reporter {
            reporter(message);
        }
    }
}

/// Unregisters a cleanup. Calling [`dispose`](Dispose::dispose) more than
/// once has no further effect.
pub struct Dispose {
    owner: Weak<Inner>,
    id: u64,
    done: AtomicBool,
}

impl Dispose {
    fn inert() -> Self {
        Self {
            owner: Weak::new(),
            id: 0,
            done: AtomicBool::new(true),
        }
    }

    /// Drop the registered cleanup without running it.
    pub fn dispose(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.owner.upgrade() {
            inner.cleanups().remove(&self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Dispose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispose")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_runs_every_cleanup_once() {
        let handle = CancelHandle::new();
        let (a, cleanup_a) = counter();
        let (b, cleanup_b) = counter();
        let _da = handle.register(cleanup_a);
        let _db = handle.register(cleanup_b);

        handle.cancel();
        handle.cancel();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(handle.registered(), 0);
    }

    #[test]
    fn disposed_cleanups_do_not_run() {
        let handle = CancelHandle::new();
        let (count, cleanup) = counter();
        let dispose = handle.register(cleanup);
        dispose.dispose();
        dispose.dispose();
        assert!(dispose.is_disposed());

        handle.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registering_after_cancel_runs_immediately() {
        let handle = CancelHandle::new();
        handle.cancel();
        let (count, cleanup) = counter();
        let dispose = handle.register(cleanup);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(dispose.is_disposed());
    }

    #[test]
    fn report_forwards_to_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = CancelHandle::with_reporter(move |msg| sink.lock().unwrap().push(msg.to_string()));
        handle.report("region 1 of 2");
        assert_eq!(*seen.lock().unwrap(), ["region 1 of 2"]);
    }

    #[tokio::test]
    async fn cancelled_future_wakes_waiters() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        handle.cancel();
        task.await.unwrap();
    }
}
