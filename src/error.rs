use thiserror::Error;

/// Sentinel errors reported by [`Context::err`](crate::Context::err).
///
/// Callers compare against these two identifiers; nothing from the
/// underlying cancellation primitive leaks through. The primitive has no
/// error values of its own, so this enum is exhaustive.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The context was explicitly canceled.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline or timeout elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
