use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::Op;
use tokio::time::Instant;

use crate::error::render_error;
use crate::{CacheEntry, LoadError, Loaded, Outcome};

/// An in-memory cache for expensive async computations.
///
/// The purpose of this cache is to do request coalescing, and to hold the results of the
/// computation in-memory for a fixed time-to-live.
///
/// - The first caller for a key (the *leader*) runs the computation. Every caller that asks
///   for the same key while it is in flight (a *follower*) waits for it and shares its result.
/// - A successful result is handed out until its TTL elapsed. Expiry is lazy: the first
///   access after the deadline replaces the stale entry with a new computation.
/// - A failed result is handed to the followers that already waited for it as
///   [`LoadError::LeaderFailed`] and then discarded, so the next access retries.
///
/// The cache never imposes a timeout on a computation. A leader that never finishes stalls
/// its followers until they give up via [`get_or_load_until`](Self::get_or_load_until).
pub struct CoalescingCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Cache<K, Arc<CacheEntry<V>>>,
}

impl<K, V> fmt::Debug for CoalescingCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a new cache whose results stay fresh for `ttl`.
    ///
    /// A `ttl` of zero disables reuse of completed results. Concurrent callers still share
    /// an in-flight computation.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        // NOTE: neither capacity nor TTL are configured on the inner cache. Entries are
        // only ever replaced lazily, by the next access for the same key.
        let entries = Cache::builder().name(name).build();

        Self { name, ttl, entries }
    }

    /// The time-to-live of successful results.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key`, or computes it by calling `compute`.
    ///
    /// `compute` is called at most once per key and expiry window, by whichever caller wins
    /// the race to create the entry. Use [`Loaded::is_fresh`] to find out whether that was
    /// this caller.
    ///
    /// # Errors
    ///
    /// - [`LoadError::Compute`] if this caller ran `compute` and it failed.
    /// - [`LoadError::LeaderFailed`] if this caller waited on another caller's failing
    ///   computation. No zero value is ever fabricated for it.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: &K,
        compute: F,
    ) -> Result<Loaded<V>, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        self.load(key, compute, &AtomicBool::new(false)).await
    }

    /// Like [`get_or_load`](Self::get_or_load), but a follower stops waiting once `cancelled`
    /// resolves.
    ///
    /// Giving up only affects this caller. The in-flight computation, and every other caller
    /// waiting on it, carry on. If this caller is the leader, `cancelled` is ignored, as its
    /// computation is shared by all of its followers.
    ///
    /// # Errors
    ///
    /// Additionally to the errors of [`get_or_load`](Self::get_or_load), this returns
    /// [`LoadError::Cancelled`] when a follower gave up.
    pub async fn get_or_load_until<F, Fut, E, C>(
        &self,
        key: &K,
        compute: F,
        cancelled: C,
    ) -> Result<Loaded<V>, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
        C: Future<Output = ()>,
    {
        let leading = AtomicBool::new(false);
        let load = self.load(key, compute, &leading);
        let give_up = async {
            cancelled.await;
            if leading.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            result = load => result,
            () = give_up => {
                tracing::debug!(cache = self.name, ?key, "stopped waiting for in-flight load");
                Err(LoadError::Cancelled)
            }
        }
    }

    /// Returns the live value for `key`, without computing or waiting for anything.
    pub async fn get_if_live(&self, key: &K) -> Option<Arc<V>> {
        let entry = self.entries.get(key).await?;
        if !entry.is_live_at(Instant::now()) {
            return None;
        }
        match entry.outcome() {
            Outcome::Ready(value) => Some(Arc::clone(value)),
            Outcome::Failed(_) => None,
        }
    }

    async fn load<F, Fut, E>(
        &self,
        key: &K,
        compute: F,
        leading: &AtomicBool,
    ) -> Result<Loaded<V>, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        let mut own_error = None;

        let init = async {
            leading.store(true, Ordering::Release);
            tracing::trace!(cache = self.name, ?key, "computing new entry");

            let outcome = match compute().await {
                Ok(value) => Outcome::Ready(Arc::new(value)),
                Err(err) => {
                    let reason = render_error(&err);
                    tracing::error!(cache = self.name, ?key, %reason, "failed to load entry");
                    own_error = Some(err);
                    Outcome::Failed(reason)
                }
            };

            Arc::new(CacheEntry::new(outcome, Instant::now() + self.ttl))
        };

        let entry = self
            .entries
            .entry_by_ref(key)
            .or_insert_with_if(init, |entry| entry.needs_refresh())
            .await;
        let is_fresh = entry.is_fresh();
        let entry = entry.into_value();

        match entry.outcome() {
            Outcome::Ready(value) => Ok(Loaded::new(Arc::clone(value), is_fresh)),
            Outcome::Failed(reason) => {
                if is_fresh {
                    self.discard(key, &entry).await;
                }
                match own_error {
                    Some(err) => Err(LoadError::Compute(err)),
                    None => Err(LoadError::LeaderFailed {
                        reason: Arc::clone(reason),
                    }),
                }
            }
        }
    }

    /// Removes `failed` from the map, unless it has been replaced in the meantime.
    async fn discard(&self, key: &K, failed: &Arc<CacheEntry<V>>) {
        let _ = self
            .entries
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(current) if Arc::ptr_eq(current.value(), failed) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }
}
