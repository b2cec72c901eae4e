use std::sync::Arc;

use tokio::time::Instant;

/// How the computation behind a [`CacheEntry`] ended.
///
/// There is no `Pending` variant: while a computation is in flight, the entry only exists as
/// the cache's internal initializer which all concurrent callers wait on. An entry is created
/// exactly once, by the leader, after its computation finished.
#[derive(Debug)]
pub enum Outcome<V> {
    /// The computation succeeded.
    Ready(Arc<V>),
    /// The computation failed, with the rendered error of the leader.
    Failed(Arc<str>),
}

/// A completed computation, as stored in the [`CoalescingCache`](crate::CoalescingCache).
#[derive(Debug)]
pub struct CacheEntry<V> {
    outcome: Outcome<V>,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(outcome: Outcome<V>, expires_at: Instant) -> Self {
        Self {
            outcome,
            expires_at,
        }
    }

    /// The outcome of the computation.
    pub fn outcome(&self) -> &Outcome<V> {
        &self.outcome
    }

    /// The point in time from which on this entry is considered stale.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether this entry may still be handed out at `now`.
    ///
    /// Failed entries are never live, so the next access retries the computation.
    pub fn is_live_at(&self, now: Instant) -> bool {
        match self.outcome {
            Outcome::Ready(_) => now < self.expires_at,
            Outcome::Failed(_) => false,
        }
    }

    /// Tells the cache whether this entry has to be replaced by a fresh computation.
    pub(crate) fn needs_refresh(&self) -> bool {
        !self.is_live_at(Instant::now())
    }
}

/// A successfully loaded value.
#[derive(Debug)]
pub struct Loaded<V> {
    value: Arc<V>,
    is_fresh: bool,
}

impl<V> Loaded<V> {
    pub(crate) fn new(value: Arc<V>, is_fresh: bool) -> Self {
        Self { value, is_fresh }
    }

    /// Returns `true` if this call ran the computation itself, i.e. it was the leader.
    ///
    /// Followers, which joined an in-flight computation or reused a cached result, get
    /// `false`.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh
    }

    /// The shared value.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Unwraps the shared value.
    pub fn into_value(self) -> Arc<V> {
        self.value
    }
}
