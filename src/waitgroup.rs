use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// A reusable countdown of outstanding completions.
///
/// Every [`Context`](crate::Context) owns one `WaitGroup` that counts its
/// registered children; registration calls [`add`](WaitGroup::add) and each
/// completion signal calls [`done`](WaitGroup::done). Clones share the same
/// counter, so a child holds a non-owning handle to its parent's group.
///
/// The group is reusable: once the count drops to zero and a wait episode
/// ends, new registrations start the next episode.
#[derive(Clone, Debug, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    zero: Notify,
}

impl WaitGroup {
    /// Create a group with no outstanding registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` completions that are expected later.
    ///
    /// Caller obligation: all registrations for a wait episode must happen
    /// before a concurrent [`wait`](WaitGroup::wait) can observe zero. An
    /// `add` racing a wait that is already unblocking can be lost, exactly
    /// as with the analogous counter primitives elsewhere; this crate
    /// documents the hazard rather than changing the counter's semantics.
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Signal one completion.
    ///
    /// # Panics
    ///
    /// Panics if called more times than [`add`](WaitGroup::add) accounted
    /// for. An underflow means completion accounting is broken and every
    /// future wait episode would be corrupt, so it is never absorbed.
    pub fn done(&self) {
        let prev = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        match prev {
            Ok(1) => self.inner.zero.notify_waiters(),
            Ok(_) => {}
            Err(_) => panic!("WaitGroup underflow: done() called more times than add()"),
        }
    }

    /// Wait until the count reaches zero.
    ///
    /// Returns immediately when nothing is outstanding. Any number of
    /// waiters may block concurrently; all of them release when the count
    /// hits zero.
    pub async fn wait(&self) {
        loop {
            // Register with the notifier before re-checking the count, so a
            // done() landing in between cannot be missed.
            let zero = self.inner.zero.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            zero.await;
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}
