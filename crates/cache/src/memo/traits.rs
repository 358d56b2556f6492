//! Trait seam for memoizing lookups.
//!
//! Code that only needs "compute this key at most once" can depend on
//! [`Computable`] instead of a concrete cache type.

use std::hash::Hash;
use std::sync::Arc;

use super::core::MemoCache;
use crate::error::MemoError;

/// A keyed store that computes each value at most once.
///
/// # Example
/// ```
/// use std::sync::Arc;
///
/// use coalesce_cache::{Computable, MemoCache, MemoError};
///
/// fn descriptor_len<C>(cache: &C, name: &str) -> Result<Arc<usize>, MemoError<String>>
/// where
///     C: Computable<String, usize, Error = String>,
/// {
///     cache.compute_if_absent(name.to_string(), || Ok(name.len()))
/// }
///
/// let cache: MemoCache<String, usize, String> = MemoCache::new();
/// assert_eq!(*descriptor_len(&cache, "user.proto").unwrap(), 10);
/// ```
pub trait Computable<K, V> {
    /// Error type of the computations
    type Error;

    /// Returns the value for `key`, running `compute` only if no value is
    /// cached or in flight.
    ///
    /// # Errors
    ///
    /// See [`MemoError`]; a failed computation is never cached.
    fn compute_if_absent<F>(&self, key: K, compute: F) -> Result<Arc<V>, MemoError<Self::Error>>
    where
        F: FnOnce() -> Result<V, Self::Error>;
}

impl<K, V, E> Computable<K, V> for MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
{
    type Error = E;

    fn compute_if_absent<F>(&self, key: K, compute: F) -> Result<Arc<V>, MemoError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get(key, compute)
    }
}
