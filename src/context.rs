use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Error;
use crate::values::ValueChain;
use crate::waitgroup::WaitGroup;

/// A point in the cancellation/completion tree.
///
/// A `Context` carries a deadline, a cancellation signal, and request-scoped
/// values, and additionally tracks completion of the work derived from it:
/// children registered through [`enable_wait`](Context::enable_wait) or
/// [`child`](Context::child) owe exactly one [`finished`](Context::finished)
/// call each, and [`wait_for_children`](Context::wait_for_children) blocks
/// until all of them have paid up.
///
/// Cancellation and deadlines are delegated to the wrapped
/// [`CancellationToken`] and `tokio::time`; this type only forwards them.
/// Cancellation and completion are independent: cancelling a child never
/// releases the parent's wait.
///
/// `Context` is cheap to clone; clones share one node. All methods may be
/// called from any number of tasks or threads simultaneously.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: Arc<CauseSlot>,
    values: Option<Arc<ValueChain>>,

    // Completion tracking. `parent` is a non-owning handle to the parent
    // node's children group; None only on roots. `pending` counts this
    // node's unconsumed registrations, `tracked` latches once the node has
    // ever been registered.
    parent: Option<WaitGroup>,
    children: WaitGroup,
    pending: AtomicUsize,
    tracked: AtomicBool,
}

/// Records why a node was cancelled. Chained parent-ward so descendants of
/// a deadline-exceeded ancestor report the ancestor's cause.
struct CauseSlot {
    slot: OnceLock<Error>,
    parent: Option<Arc<CauseSlot>>,
}

impl CauseSlot {
    fn root() -> Arc<Self> {
        Arc::new(CauseSlot {
            slot: OnceLock::new(),
            parent: None,
        })
    }

    fn child(parent: &Arc<CauseSlot>) -> Arc<Self> {
        Arc::new(CauseSlot {
            slot: OnceLock::new(),
            parent: Some(Arc::clone(parent)),
        })
    }

    fn record(&self, err: Error) -> bool {
        self.slot.set(err).is_ok()
    }

    /// First recorded cause walking from this node toward the root.
    fn nearest(&self) -> Option<Error> {
        let mut cur = Some(self);
        while let Some(node) = cur {
            if let Some(err) = node.slot.get() {
                return Some(*err);
            }
            cur = node.parent.as_deref();
        }
        None
    }
}

/// Cancels the context it was returned alongside.
///
/// Cloneable and idempotent. Dropping the handle does *not* cancel:
/// cancellation stays an explicit act, and completion accounting is never
/// tied to it.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    cause: Arc<CauseSlot>,
}

impl CancelHandle {
    /// Cancel the associated context and all contexts derived from it.
    ///
    /// Cancellation does not signal completion; a registered context still
    /// owes its [`finished`](Context::finished) call on every exit path.
    pub fn cancel(&self) {
        if self.cause.record(Error::Canceled) {
            debug!("context canceled");
        }
        self.token.cancel();
    }
}

impl Context {
    /// An empty root context: never cancelled, no deadline, no values.
    ///
    /// The usual top of a context tree.
    pub fn background() -> Self {
        Self::root(CancellationToken::new())
    }

    /// An empty root context for call sites that have not decided which
    /// context to thread through yet. Behaves exactly like
    /// [`background`](Context::background); the distinct name marks the
    /// call site as provisional.
    pub fn todo() -> Self {
        Self::root(CancellationToken::new())
    }

    /// Wrap an externally owned [`CancellationToken`] as a root context.
    ///
    /// Cancelling the token outside this crate cancels the context; since
    /// no cause is recorded for such a cancellation, [`err`](Context::err)
    /// normalizes it to [`Error::Canceled`].
    pub fn from_token(token: CancellationToken) -> Self {
        Self::root(token)
    }

    fn root(token: CancellationToken) -> Self {
        Context {
            inner: Arc::new(Inner {
                token,
                deadline: None,
                cause: CauseSlot::root(),
                values: None,
                parent: None,
                children: WaitGroup::new(),
                pending: AtomicUsize::new(0),
                tracked: AtomicBool::new(false),
            }),
        }
    }

    /// The earliest deadline that applies to this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Resolves once this context is cancelled, whether explicitly, by an
    /// ancestor, or by deadline expiry. Cancellation-safe.
    pub async fn done(&self) {
        self.inner.token.cancelled().await;
    }

    /// `None` while the context is live; after cancellation, the sentinel
    /// describing why: [`Error::Canceled`] for an explicit cancel,
    /// [`Error::DeadlineExceeded`] once a deadline timer has fired. A node
    /// cancelled through an ancestor reports the ancestor's cause.
    pub fn err(&self) -> Option<Error> {
        if !self.inner.token.is_cancelled() {
            return None;
        }
        Some(self.inner.cause.nearest().unwrap_or(Error::Canceled))
    }

    /// Look up a value of type `V` in this context's derivation chain.
    ///
    /// The binding nearest this node wins. Returns `None` when no ancestor
    /// attached a `V` via [`with_value`](Context::with_value).
    pub fn value<V: Send + Sync + 'static>(&self) -> Option<Arc<V>> {
        self.inner.values.as_deref()?.get::<V>()
    }

    /// Derive a child that can be cancelled independently of its parent.
    ///
    /// The child is *not* registered for wait-tracking; see
    /// [`enable_wait`](Context::enable_wait) or [`child`](Context::child)
    /// for that.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        self.derive(None)
    }

    /// Derive a child that is cancelled at `deadline`.
    ///
    /// A requested deadline later than the parent's is clamped: the
    /// parent's timer already covers it through cancellation propagation,
    /// so no new timer is armed. A deadline already in the past cancels the
    /// child immediately with [`Error::DeadlineExceeded`].
    ///
    /// Must be called within a Tokio runtime, which supplies the timer.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        self.derive(Some(deadline))
    }

    /// Derive a child that is cancelled after `timeout`.
    ///
    /// Equivalent to [`with_deadline`](Context::with_deadline) at
    /// `Instant::now() + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derive a child carrying one extra value binding.
    ///
    /// The child shares its parent's cancellation lifetime and deadline; it
    /// cannot be cancelled independently, so no handle is returned. Like
    /// every plain derivation it starts unregistered.
    pub fn with_value<V: Send + Sync + 'static>(&self, value: V) -> Context {
        Context {
            inner: Arc::new(Inner {
                token: self.inner.token.clone(),
                deadline: self.inner.deadline,
                cause: Arc::clone(&self.inner.cause),
                values: Some(ValueChain::push(self.inner.values.clone(), value)),
                parent: Some(self.inner.children.clone()),
                children: WaitGroup::new(),
                pending: AtomicUsize::new(0),
                tracked: AtomicBool::new(false),
            }),
        }
    }

    /// Register this context for wait-tracking against its parent and
    /// return a clone of it.
    ///
    /// Each registration obliges exactly one [`finished`](Context::finished)
    /// call, on every exit path of the associated work. Call `enable_wait`
    /// once per task that will report completion independently; clones of
    /// one context share a single registration account.
    ///
    /// Registrations must be issued before the parent's
    /// [`wait_for_children`](Context::wait_for_children) can observe zero
    /// outstanding children; see [`WaitGroup::add`]. On a root context this
    /// is a no-op, since there is no parent to register against.
    pub fn enable_wait(&self) -> Context {
        if let Some(parent) = &self.inner.parent {
            parent.add(1);
            self.inner.pending.fetch_add(1, Ordering::AcqRel);
            self.inner.tracked.store(true, Ordering::Release);
            trace!("context registered for parent wait");
        }
        self.clone()
    }

    /// Derive-and-register convenience: [`with_cancel`](Context::with_cancel)
    /// followed by [`enable_wait`](Context::enable_wait).
    ///
    /// The caller owes exactly one [`finished`](Context::finished) call on
    /// the returned context.
    pub fn child(&self) -> (Context, CancelHandle) {
        let (ctx, handle) = self.with_cancel();
        (ctx.enable_wait(), handle)
    }

    /// Signal that the work associated with this context has completed,
    /// decrementing the parent's counter.
    ///
    /// A no-op on roots and on contexts that were never registered. On a
    /// registered context, call it exactly once per registration, on every
    /// exit path of the work (success, error, and cancellation alike).
    ///
    /// # Panics
    ///
    /// Panics when called more times than the context was registered. The
    /// panic fires before the parent's counter is touched, so one
    /// misbehaving child cannot corrupt accounting its siblings rely on.
    pub fn finished(&self) {
        let Some(parent) = &self.inner.parent else {
            return;
        };
        if !self.inner.tracked.load(Ordering::Acquire) {
            return;
        }
        let consumed = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1));
        if consumed.is_err() {
            panic!("finished() called more times than this context was registered");
        }
        trace!("context finished");
        parent.done();
    }

    /// Wait until every registration against this context has been matched
    /// by a [`finished`](Context::finished) call.
    ///
    /// Returns immediately when no registrations are outstanding.
    /// Reentrant: any number of callers may wait concurrently, and each
    /// call observes the current outstanding count. Cancellation of this
    /// context or its children never releases the wait.
    pub async fn wait_for_children(&self) {
        let outstanding = self.inner.children.outstanding();
        if outstanding > 0 {
            trace!(outstanding, "waiting for children");
        }
        self.inner.children.wait().await;
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelHandle) {
        let token = self.inner.token.child_token();
        let cause = CauseSlot::child(&self.inner.cause);

        // Clamp to the parent's effective deadline; a timer is only armed
        // when this derivation tightens it.
        let effective = match (self.inner.deadline, deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        let timer = match (deadline, self.inner.deadline) {
            (Some(own), Some(parent)) if own < parent => Some(own),
            (Some(own), None) => Some(own),
            _ => None,
        };

        let ctx = Context {
            inner: Arc::new(Inner {
                token: token.clone(),
                deadline: effective,
                cause: Arc::clone(&cause),
                values: self.inner.values.clone(),
                parent: Some(self.inner.children.clone()),
                children: WaitGroup::new(),
                pending: AtomicUsize::new(0),
                tracked: AtomicBool::new(false),
            }),
        };
        let handle = CancelHandle {
            token: token.clone(),
            cause: Arc::clone(&cause),
        };

        if let Some(deadline) = timer {
            if deadline <= Instant::now() {
                cause.record(Error::DeadlineExceeded);
                token.cancel();
            } else {
                Self::arm_deadline(token, cause, deadline);
            }
        }

        (ctx, handle)
    }

    fn arm_deadline(token: CancellationToken, cause: Arc<CauseSlot>, deadline: Instant) {
        trace!(?deadline, "deadline timer armed");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if cause.record(Error::DeadlineExceeded) {
                        debug!("context deadline exceeded");
                    }
                    token.cancel();
                }
            }
        });
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.inner.token.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .field("outstanding_children", &self.inner.children.outstanding())
            .finish_non_exhaustive()
    }
}
