//! Blocking memo cache
//!
//! [`MemoCache`] maps keys to lazily computed values and guarantees that, for
//! each key, at most one computation is in flight at a time. The first caller
//! for an absent key installs a [`Slot`] through the map's entry API and runs
//! the computation on its own thread; every concurrent caller for the same key
//! blocks on that slot and receives the same `Arc`.
//!
//! Failed computations are purged from the map before their waiters are woken,
//! so the next lookup starts a fresh attempt. A computation that panics is
//! purged the same way by a drop guard, and its waiters receive
//! [`MemoError::Abandoned`].

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, trace, warn};

use super::config::MemoConfig;
use super::slot::{Slot, SlotState};
use super::stats::{MemoStats, MetricsCollector};
use crate::error::MemoError;
use crate::MemoResult;

/// Thread-safe memoizing cache
///
/// # Type Parameters
/// - `K`: Key type (must be `Eq + Hash + Clone`)
/// - `V`: Value type; values are shared as `Arc<V>`
/// - `E`: Error type of the computations
///
/// Unrelated keys never wait on each other: the map is sharded and no map
/// lock is held while a computation runs.
///
/// # Deadlocks
///
/// A computation must not request its own key from the same cache; it would
/// wait on itself.
///
/// # Example
/// ```
/// use coalesce_cache::MemoCache;
///
/// let cache: MemoCache<String, usize, std::io::Error> = MemoCache::new();
///
/// let len = cache.get("hello".to_string(), || Ok("hello".len())).unwrap();
/// assert_eq!(*len, 5);
///
/// // cached: the second computation never runs
/// let again = cache.get("hello".to_string(), || Ok(0)).unwrap();
/// assert_eq!(*again, 5);
/// ```
pub struct MemoCache<K, V, E>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Arc<Slot<V, E>>>,
    next_epoch: AtomicU64,
    config: MemoConfig,
    metrics: MetricsCollector,
}

impl<K, V, E> Default for MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache with the default configuration
    pub fn new() -> Self {
        Self::with_config(MemoConfig::default())
    }

    /// Create an empty cache with the given configuration
    pub fn with_config(config: MemoConfig) -> Self {
        let metrics = MetricsCollector::new(config.track_metrics);
        Self { slots: DashMap::new(), next_epoch: AtomicU64::new(0), config, metrics }
    }

    /// Get the value for `key`, computing it with `compute` if absent.
    ///
    /// If another caller is already computing `key`, this blocks until that
    /// computation settles and returns its outcome; `compute` is then dropped
    /// without being called. Once a value is cached, every later call
    /// returns the same `Arc` without calling `compute`.
    ///
    /// # Errors
    ///
    /// - [`MemoError::Failed`] if the computation of this attempt returned an
    ///   error. The key is purged, so the next call computes again.
    /// - [`MemoError::Abandoned`] if the computing caller panicked.
    pub fn get<F>(&self, key: K, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.lookup(key, None, compute)
    }

    /// Like [`get`](Self::get), but gives up waiting on another caller's
    /// computation after `timeout`.
    ///
    /// The timeout only bounds the wait. If this caller installs the slot it
    /// runs `compute` to completion, and a caller that times out leaves the
    /// in-flight computation and its slot untouched.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`MemoError::TimedOut`] when the wait
    /// expires.
    pub fn get_timeout<F>(&self, key: K, timeout: Duration, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.lookup(key, Some(timeout), compute)
    }

    /// [`get`](Self::get) for computations that cannot fail.
    ///
    /// # Errors
    ///
    /// [`MemoError::Abandoned`] if the computing caller panicked.
    pub fn get_with<F>(&self, key: K, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> V,
    {
        self.lookup(key, None, || Ok(compute()))
    }

    /// Returns the cached value for `key` without computing or waiting.
    ///
    /// `None` if the key is absent or still being computed.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        slot.ready_value()
    }

    /// Returns `true` if `key` has a completed or in-flight entry
    pub fn contains_key(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of entries, completed or in flight
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Name reported in log records
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration this cache was built with
    pub const fn config(&self) -> &MemoConfig {
        &self.config
    }

    /// Snapshot of the cache counters
    pub fn stats(&self) -> MemoStats {
        self.metrics.snapshot(self.slots.len())
    }

    /// Reset all counters to zero; cached entries are kept
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    fn lookup<F>(&self, key: K, timeout: Option<Duration>, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        // read path first so completed keys never take a shard write lock
        let existing = self.slots.get(&key).map(|entry| Arc::clone(entry.value()));
        let (slot, installed) = match existing {
            Some(slot) => (slot, false),
            None => self.install(&key),
        };

        if installed {
            self.compute_into(key, &slot, compute)
        } else {
            self.join(&slot, timeout)
        }
    }

    /// Insert-if-absent; returns the slot now associated with `key` and
    /// whether this caller installed it.
    fn install(&self, key: &K) -> (Arc<Slot<V, E>>, bool) {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot::new(self.next_epoch.fetch_add(1, Ordering::Relaxed)));
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    fn compute_into<F>(&self, key: K, slot: &Arc<Slot<V, E>>, compute: F) -> MemoResult<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.metrics.record_computation();
        debug!(cache = %self.config.name, epoch = slot.epoch(), "Installed slot, computing value");

        let guard = InstallGuard { cache: self, key, slot, armed: true };
        let result = compute();
        guard.settle(result)
    }

    fn join(&self, slot: &Slot<V, E>, timeout: Option<Duration>) -> MemoResult<V, E> {
        match slot.peek() {
            Some(Ok(value)) => {
                self.metrics.record_hit();
                trace!(cache = %self.config.name, epoch = slot.epoch(), "Cached value hit");
                return Ok(value);
            }
            Some(Err(err)) => {
                self.metrics.record_coalesced();
                return Err(err);
            }
            None => {}
        }

        self.metrics.record_coalesced();
        trace!(cache = %self.config.name, epoch = slot.epoch(), "Waiting on in-flight computation");

        let started = Instant::now();
        let Some(deadline) = timeout.and_then(|timeout| started.checked_add(timeout)) else {
            return slot.wait();
        };

        slot.wait_until(deadline).unwrap_or_else(|| {
            let waited = started.elapsed();
            self.metrics.record_timeout();
            warn!(
                cache = %self.config.name,
                epoch = slot.epoch(),
                waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                "Timed out waiting on in-flight computation"
            );
            Err(MemoError::TimedOut { waited })
        })
    }

    /// Removes `key` only if it still maps to the slot of `epoch`.
    fn purge(&self, key: &K, epoch: u64) -> bool {
        self.slots.remove_if(key, |_, slot| slot.epoch() == epoch).is_some()
    }
}

impl<K, V, E> fmt::Debug for MemoCache<K, V, E>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("name", &self.config.name)
            .field("entries", &self.slots.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Settles the installer's slot, or abandons it if the computation unwinds.
struct InstallGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
{
    cache: &'a MemoCache<K, V, E>,
    key: K,
    slot: &'a Arc<Slot<V, E>>,
    armed: bool,
}

impl<K, V, E> InstallGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn settle(mut self, result: Result<V, E>) -> MemoResult<V, E> {
        self.armed = false;
        let cache = self.cache;
        let epoch = self.slot.epoch();

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                self.slot.settle(SlotState::Ready(Arc::clone(&value)));
                debug!(cache = %cache.config.name, epoch, "Computation settled");
                Ok(value)
            }
            Err(err) => {
                let err = Arc::new(err);
                // purge before waking waiters so no later caller sees this slot
                cache.purge(&self.key, epoch);
                self.slot.settle(SlotState::Failed(Arc::clone(&err)));
                cache.metrics.record_failure();
                warn!(cache = %cache.config.name, epoch, "Computation failed, entry purged");
                Err(MemoError::Failed(err))
            }
        }
    }
}

impl<K, V, E> Drop for InstallGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let epoch = self.slot.epoch();
        self.cache.purge(&self.key, epoch);
        self.slot.settle(SlotState::Abandoned);
        self.cache.metrics.record_abandoned();
        error!(cache = %self.cache.config.name, epoch, "Computation abandoned, entry purged");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for memo::core.
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Barrier};
    use std::thread;

    use super::*;

    type StrCache = MemoCache<String, String, String>;

    fn key(name: &str) -> String {
        name.to_string()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Validates `MemoCache::get` behavior for the first-call scenario.
    ///
    /// Assertions:
    /// - Confirms the computed value is returned.
    /// - Confirms the entry is retained afterwards.
    #[test]
    fn test_get_computes_and_caches() {
        let cache = StrCache::new();
        let value = cache.get(key("a"), || Ok("alpha".to_string())).unwrap();

        assert_eq!(value.as_str(), "alpha");
        assert!(cache.contains_key(&key("a")));
        assert_eq!(cache.len(), 1);
    }

    /// Validates that a cached value is returned without calling the new
    /// computation.
    ///
    /// Assertions:
    /// - Confirms the second closure is never invoked.
    /// - Ensures both results are the same `Arc`.
    #[test]
    fn test_cached_value_skips_compute() {
        let cache = StrCache::new();
        let first = cache.get(key("a"), || Ok("alpha".to_string())).unwrap();
        let second = cache
            .get(key("a"), || -> Result<String, String> { panic!("must not recompute") })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = StrCache::new();
        let err = cache.get(key("a"), || Err("nope".to_string())).unwrap_err();

        assert_eq!(err.computation_error().map(String::as_str), Some("nope"));
        assert!(!cache.contains_key(&key("a")));
        assert!(cache.is_empty());

        let value = cache.get(key("a"), || Ok("second try".to_string())).unwrap();
        assert_eq!(value.as_str(), "second try");
    }

    #[test]
    fn test_get_with_infallible() {
        let cache: MemoCache<u32, u32, String> = MemoCache::new();
        assert_eq!(*cache.get_with(4, || 16).unwrap(), 16);
        assert_eq!(*cache.get_with(4, || 0).unwrap(), 16);
    }

    #[test]
    fn test_peek() {
        let cache = StrCache::new();
        assert!(cache.peek(&key("a")).is_none());

        cache.get(key("a"), || Ok("alpha".to_string())).unwrap();
        assert_eq!(cache.peek(&key("a")).as_deref().map(String::as_str), Some("alpha"));
    }

    /// Validates the race between many threads requesting one absent key.
    ///
    /// Assertions:
    /// - Confirms the computation ran exactly once.
    /// - Ensures every thread received the same `Arc`.
    #[test]
    fn test_concurrent_get_computes_once() {
        const THREADS: usize = 16;

        let cache = Arc::new(StrCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get(key("shared"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok("computed".to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|value| Arc::ptr_eq(value, &results[0])));

        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.total_requests(), THREADS as u64);
    }

    /// Validates that waiters of a failed attempt all see the failure and the
    /// key is purged.
    ///
    /// Assertions:
    /// - Ensures the waiter receives the same error `Arc` as the installer.
    /// - Ensures the key is absent afterwards.
    #[test]
    fn test_waiters_share_failure() {
        let cache = Arc::new(StrCache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let installer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(key("k"), move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Err("backend unavailable".to_string())
                })
            })
        };
        started_rx.recv().unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(key("k"), || Ok("should not run".to_string())))
        };
        wait_until(|| cache.stats().coalesced == 1);
        release_tx.send(()).unwrap();

        let installer_err = installer.join().unwrap().unwrap_err();
        let waiter_err = waiter.join().unwrap().unwrap_err();

        assert!(Arc::ptr_eq(
            installer_err.shared_error().unwrap(),
            waiter_err.shared_error().unwrap()
        ));
        assert!(!cache.contains_key(&key("k")));
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_panicking_compute_abandons_slot() {
        let cache = StrCache::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            cache.get(key("p"), || -> Result<String, String> { panic!("compute blew up") })
        }));

        assert!(result.is_err());
        assert!(!cache.contains_key(&key("p")));
        assert_eq!(cache.stats().abandoned, 1);

        let value = cache.get(key("p"), || Ok("recovered".to_string())).unwrap();
        assert_eq!(value.as_str(), "recovered");
    }

    /// Validates that waiters are released when the installer panics.
    ///
    /// Assertions:
    /// - Ensures the waiter receives `MemoError::Abandoned`.
    #[test]
    fn test_waiter_sees_abandoned_on_installer_panic() {
        let cache = Arc::new(StrCache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let installer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(key("k"), move || -> Result<String, String> {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("installer died");
                })
            })
        };
        started_rx.recv().unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(key("k"), || Ok("unused".to_string())))
        };
        wait_until(|| cache.stats().coalesced == 1);
        release_tx.send(()).unwrap();

        assert!(installer.join().is_err());
        assert!(waiter.join().unwrap().unwrap_err().is_abandoned());
        assert!(!cache.contains_key(&key("k")));
    }

    /// Validates `get_timeout` for a waiter whose deadline passes.
    ///
    /// Assertions:
    /// - Ensures the waiter receives `MemoError::TimedOut`.
    /// - Confirms the installer's value is still cached afterwards.
    #[test]
    fn test_timeout_leaves_slot_alone() {
        let cache = Arc::new(StrCache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let installer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(key("slow"), move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok("eventually".to_string())
                })
            })
        };
        started_rx.recv().unwrap();

        let err = cache
            .get_timeout(key("slow"), Duration::from_millis(20), || Ok("unused".to_string()))
            .unwrap_err();
        assert!(err.is_timed_out());
        assert!(cache.contains_key(&key("slow")));
        assert_eq!(cache.stats().timeouts, 1);

        release_tx.send(()).unwrap();
        let value = installer.join().unwrap().unwrap();
        assert_eq!(value.as_str(), "eventually");

        let cached = cache
            .get_timeout(key("slow"), Duration::from_millis(20), || Ok("unused".to_string()))
            .unwrap();
        assert!(Arc::ptr_eq(&value, &cached));
    }

    #[test]
    fn test_huge_timeout_waits_without_overflow() {
        let cache = StrCache::new();
        let value = cache
            .get_timeout(key("a"), Duration::MAX, || Ok("fine".to_string()))
            .unwrap();
        assert_eq!(value.as_str(), "fine");
        assert_eq!(
            cache.get_timeout(key("a"), Duration::MAX, || Ok(String::new())).unwrap().as_str(),
            "fine"
        );
    }

    #[test]
    fn test_purge_checks_epoch() {
        let cache = StrCache::new();
        cache.get(key("a"), || Ok("alpha".to_string())).unwrap();

        // a stale epoch must not remove the live entry
        assert!(!cache.purge(&key("a"), 99));
        assert!(cache.contains_key(&key("a")));
    }

    #[test]
    fn test_stats_hits_and_reset() {
        let cache = StrCache::new();
        cache.get(key("a"), || Ok("alpha".to_string())).unwrap();
        cache.get(key("a"), || Ok("unused".to_string())).unwrap();
        cache.get(key("a"), || Ok("unused".to_string())).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, 2);

        cache.reset_stats();
        let stats = cache.stats();
        assert_eq!(stats.total_requests(), 0);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_named_config_and_debug() {
        let cache: StrCache = MemoCache::with_config(MemoConfig::named("descriptors"));
        assert_eq!(cache.name(), "descriptors");

        let rendered = format!("{cache:?}");
        assert!(rendered.contains("descriptors"));
        assert!(rendered.contains("entries: 0"));
    }

    #[test]
    fn test_untracked_cache_reports_zero_counters() {
        let config = MemoConfig::builder().track_metrics(false).build();
        let cache: StrCache = MemoCache::with_config(config);
        cache.get(key("a"), || Ok("alpha".to_string())).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.computations, 0);
    }
}
