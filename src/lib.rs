//! # waitctx
//!
//! Cancellation contexts that can wait for their children.
//!
//! A [`Context`] carries a deadline, a cancellation signal, and
//! request-scoped values across API boundaries, delegating all of that to
//! [`tokio_util::sync::CancellationToken`] and `tokio::time`. On top it
//! adds completion tracking: a context can be registered against its
//! parent, after which the parent's [`Context::wait_for_children`] blocks
//! until every registered child has called [`Context::finished`].
//!
//! Cancellation and completion are deliberately independent. Cancelling a
//! child tells it to stop; it does not tell the parent the child *has*
//! stopped. Only an explicit `finished()` does that.
//!
//! ## Quick start
//!
//! ```rust
//! use waitctx::Context;
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = Context::background();
//!
//!     // Derive a cancellable child and opt it into wait-tracking.
//!     let (ctx, cancel) = root.with_cancel();
//!     let worker = ctx.enable_wait();
//!     tokio::spawn(async move {
//!         // ... do the work, checking worker.done() / worker.err() ...
//!         worker.finished();
//!     });
//!
//!     // Blocks until the worker reports completion.
//!     root.wait_for_children().await;
//!     cancel.cancel();
//! }
//! ```
//!
//! ## Registration discipline
//!
//! Plain derivations ([`Context::with_cancel`], [`Context::with_deadline`],
//! [`Context::with_timeout`], [`Context::with_value`]) never register the
//! child. Registration is an explicit opt-in via
//! [`Context::enable_wait`], or the [`Context::child`] convenience that
//! derives and registers in one call. Every registration obliges exactly
//! one `finished()` call, on every exit path of the work, including error
//! and cancellation paths. Calling `finished()` more often than the
//! context was registered panics; never-registered contexts (and roots)
//! treat it as a no-op.
//!
//! One context handed to several tasks that each report completion
//! independently should be registered once per task (or derive one child
//! per task) so the accounting stays one-to-one.
//!
//! ## Deadlines
//!
//! ```rust
//! use std::time::Duration;
//! use waitctx::{Context, Error};
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = Context::background();
//!     let (ctx, _cancel) = root.with_timeout(Duration::from_millis(10));
//!
//!     ctx.done().await;
//!     assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
//! }
//! ```

pub mod context;
pub mod error;
pub mod waitgroup;

mod values;

// Re-export main types
pub use context::{CancelHandle, Context};
pub use error::Error;
pub use waitgroup::WaitGroup;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
