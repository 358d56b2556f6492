//! Async memo cache for callers running on the tokio runtime.
//!
//! Same contract as the blocking [`MemoCache`](super::MemoCache): one
//! computation per key in flight, every concurrent caller receives the same
//! `Arc`, failures are purged rather than cached. The installer drives the
//! computation future inline; other callers await the slot's
//! `tokio::sync::watch` channel.
//!
//! Dropping a waiting caller's future only abandons that caller's wait.
//! Dropping the installer's future cancels the computation itself: the key is
//! purged and the remaining waiters receive [`MemoError::Abandoned`].

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use super::config::MemoConfig;
use super::slot::SlotState;
use super::stats::{MemoStats, MetricsCollector};
use crate::error::MemoError;
use crate::MemoResult;

/// Async counterpart of the blocking slot; the installer owns the sender.
struct AsyncSlot<V, E> {
    epoch: u64,
    state: watch::Receiver<SlotState<V, E>>,
}

impl<V, E> AsyncSlot<V, E> {
    fn peek(&self) -> Option<MemoResult<V, E>> {
        self.state.borrow().outcome()
    }

    fn ready_value(&self) -> Option<Arc<V>> {
        self.state.borrow().ready_value()
    }

    async fn wait(&self) -> MemoResult<V, E> {
        let mut state = self.state.clone();
        let settled =
            state.wait_for(|state| !state.is_pending()).await.map(|state| state.outcome());

        match settled {
            Ok(Some(outcome)) => outcome,
            // sender dropped without settling
            Ok(None) | Err(_) => Err(MemoError::Abandoned),
        }
    }
}

/// Async memoizing cache
///
/// # Type Parameters
///
/// * `K` - Key type (must implement `Eq + Hash + Clone`)
/// * `V` - Value type; values are shared as `Arc<V>`
/// * `E` - Error type of the computations
///
/// # Examples
///
/// ```
/// use coalesce_cache::AsyncMemoCache;
///
/// #[tokio::main]
/// async fn main() {
///     let cache: AsyncMemoCache<u64, String, std::io::Error> = AsyncMemoCache::new();
///
///     let value = cache.get(7, || async { Ok("seven".to_string()) }).await.unwrap();
///     assert_eq!(value.as_str(), "seven");
///
///     let again = cache.get(7, || async { Ok(String::new()) }).await.unwrap();
///     assert_eq!(again.as_str(), "seven");
/// }
/// ```
pub struct AsyncMemoCache<K, V, E>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Arc<AsyncSlot<V, E>>>,
    next_epoch: AtomicU64,
    config: MemoConfig,
    metrics: MetricsCollector,
}

impl<K, V, E> Default for AsyncMemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> AsyncMemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty async cache with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoConfig::default())
    }

    /// Creates an empty async cache with the specified configuration.
    pub fn with_config(config: MemoConfig) -> Self {
        let metrics = MetricsCollector::new(config.track_metrics);
        Self { slots: DashMap::new(), next_epoch: AtomicU64::new(0), config, metrics }
    }

    /// Gets the value for `key`, awaiting `compute` if it is absent.
    ///
    /// # Errors
    ///
    /// - [`MemoError::Failed`] if the computation of this attempt returned an
    ///   error; the key is purged.
    /// - [`MemoError::Abandoned`] if the installing caller was cancelled or
    ///   panicked before the computation settled.
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.lookup(key, None, compute).await
    }

    /// Like [`get`](Self::get), but stops waiting on another caller's
    /// computation after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`MemoError::TimedOut`] when the wait
    /// expires. The in-flight computation is not affected.
    pub async fn get_timeout<F, Fut>(&self, key: K, timeout: Duration, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.lookup(key, Some(timeout), compute).await
    }

    /// [`get`](Self::get) for computations that cannot fail.
    ///
    /// # Errors
    ///
    /// [`MemoError::Abandoned`] if the installing caller went away.
    pub async fn get_with<F, Fut>(&self, key: K, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.lookup(key, None, move || async move { Ok(compute().await) }).await
    }

    /// Returns the cached value for `key` without computing or waiting.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        slot.ready_value()
    }

    /// Returns `true` if `key` has a completed or in-flight entry.
    pub fn contains_key(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of entries, completed or in flight.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Name reported in log records.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> MemoStats {
        self.metrics.snapshot(self.slots.len())
    }

    /// Resets all counters to zero.
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    async fn lookup<F, Fut>(&self, key: K, timeout: Option<Duration>, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let existing = self.slots.get(&key).map(|entry| Arc::clone(entry.value()));
        let (slot, sender) = match existing {
            Some(slot) => (slot, None),
            None => self.install(&key),
        };

        match sender {
            Some(sender) => self.compute_into(key, slot.epoch, sender, compute).await,
            None => self.join(&slot, timeout).await,
        }
    }

    /// Insert-if-absent; the sender is returned only to the installer.
    #[allow(clippy::type_complexity)]
    fn install(
        &self,
        key: &K,
    ) -> (Arc<AsyncSlot<V, E>>, Option<watch::Sender<SlotState<V, E>>>) {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), None),
            Entry::Vacant(entry) => {
                let (sender, state) = watch::channel(SlotState::Pending);
                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                let slot = Arc::new(AsyncSlot { epoch, state });
                entry.insert(Arc::clone(&slot));
                (slot, Some(sender))
            }
        }
    }

    async fn compute_into<F, Fut>(
        &self,
        key: K,
        epoch: u64,
        sender: watch::Sender<SlotState<V, E>>,
        compute: F,
    ) -> MemoResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.metrics.record_computation();
        debug!(cache = %self.config.name, epoch, "Installed slot, computing value");

        let guard = AsyncInstallGuard { cache: self, key, epoch, sender, armed: true };
        let result = compute().await;
        guard.settle(result)
    }

    async fn join(&self, slot: &AsyncSlot<V, E>, timeout: Option<Duration>) -> MemoResult<V, E> {
        match slot.peek() {
            Some(Ok(value)) => {
                self.metrics.record_hit();
                trace!(cache = %self.config.name, epoch = slot.epoch, "Cached value hit");
                return Ok(value);
            }
            Some(Err(err)) => {
                self.metrics.record_coalesced();
                return Err(err);
            }
            None => {}
        }

        self.metrics.record_coalesced();
        trace!(cache = %self.config.name, epoch = slot.epoch, "Awaiting in-flight computation");

        let Some(timeout) = timeout else {
            return slot.wait().await;
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, slot.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let waited = started.elapsed();
                self.metrics.record_timeout();
                warn!(
                    cache = %self.config.name,
                    epoch = slot.epoch,
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "Timed out awaiting in-flight computation"
                );
                Err(MemoError::TimedOut { waited })
            }
        }
    }

    fn purge(&self, key: &K, epoch: u64) -> bool {
        self.slots.remove_if(key, |_, slot| slot.epoch == epoch).is_some()
    }
}

impl<K, V, E> fmt::Debug for AsyncMemoCache<K, V, E>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemoCache")
            .field("name", &self.config.name)
            .field("entries", &self.slots.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Publishes the installer's outcome; abandons the slot if dropped first.
struct AsyncInstallGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
{
    cache: &'a AsyncMemoCache<K, V, E>,
    key: K,
    epoch: u64,
    sender: watch::Sender<SlotState<V, E>>,
    armed: bool,
}

impl<K, V, E> AsyncInstallGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn settle(mut self, result: Result<V, E>) -> MemoResult<V, E> {
        self.armed = false;
        let cache = self.cache;
        let epoch = self.epoch;

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                self.sender.send_replace(SlotState::Ready(Arc::clone(&value)));
                debug!(cache = %cache.config.name, epoch, "Computation settled");
                Ok(value)
            }
            Err(err) => {
                let err = Arc::new(err);
                cache.purge(&self.key, epoch);
                self.sender.send_replace(SlotState::Failed(Arc::clone(&err)));
                cache.metrics.record_failure();
                warn!(cache = %cache.config.name, epoch, "Computation failed, entry purged");
                Err(MemoError::Failed(err))
            }
        }
    }
}

impl<K, V, E> Drop for AsyncInstallGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cache.purge(&self.key, self.epoch);
        self.sender.send_replace(SlotState::Abandoned);
        self.cache.metrics.record_abandoned();
        error!(
            cache = %self.cache.config.name,
            epoch = self.epoch,
            "Computation cancelled before settling, entry purged"
        );
    }
}
