use std::fmt;
use std::sync::Arc;

/// The ways in which [`CoalescingCache::get_or_load`](crate::CoalescingCache::get_or_load)
/// can fail.
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E> {
    /// This caller was the leader and its own computation failed.
    #[error("{0}")]
    Compute(E),
    /// This caller waited on another caller's computation, and that computation failed.
    ///
    /// The failed entry has been discarded, a new call will retry the computation.
    #[error("previous load for this key failed: {reason}")]
    LeaderFailed {
        /// The rendered error of the failed leader.
        reason: Arc<str>,
    },
    /// This caller stopped waiting on another caller's computation.
    #[error("cancelled while waiting for an in-flight load")]
    Cancelled,
}

impl<E> LoadError<E> {
    /// Returns `true` if the error was produced by this caller's own computation.
    ///
    /// Callers that stream progress use this to tell whether the failure was already
    /// reported live.
    pub fn is_own_failure(&self) -> bool {
        matches!(self, Self::Compute(_))
    }
}

/// Renders an error with its chain of causes, if the alternate flag is supported.
pub(crate) fn render_error<E: fmt::Display>(err: &E) -> Arc<str> {
    format!("{err:#}").into()
}
