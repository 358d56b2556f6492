//! Concurrent memoizing caches
//!
//! A memo cache maps keys to lazily computed values. For each key the
//! computation runs at most once at a time: the first caller for an absent
//! key installs a slot and computes, every concurrent caller for that key
//! waits on the same slot and receives the same `Arc`.
//!
//! # Features
//!
//! - **At most one computation per key**: concurrent callers are coalesced
//! - **Independent keys**: the backing `DashMap` is sharded and no map lock
//!   is held while a computation runs
//! - **No cached failures**: a failed or panicked computation is purged so
//!   the next lookup retries
//! - **Distinct outcomes**: failure, abandonment, and timed-out waits are
//!   separate [`MemoError`](crate::MemoError) variants, never a missing value
//! - **Unbounded**: entries live as long as the cache; there is no eviction
//!
//! # Examples
//!
//! ## Blocking lookups shared across threads
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use coalesce_cache::MemoCache;
//!
//! let cache: Arc<MemoCache<u32, u64, String>> = Arc::new(MemoCache::new());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let cache = Arc::clone(&cache);
//!         thread::spawn(move || cache.get(20, || Ok((1..=20).product())).unwrap())
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(*handle.join().unwrap(), 2_432_902_008_176_640_000);
//! }
//! assert_eq!(cache.stats().computations, 1);
//! ```
//!
//! ## Failures are reported, not cached
//! ```
//! use coalesce_cache::MemoCache;
//!
//! let cache: MemoCache<&str, String, String> = MemoCache::new();
//!
//! let err = cache.get("config", || Err("not reachable".to_string())).unwrap_err();
//! assert!(err.is_failed());
//! assert!(!cache.contains_key(&"config"));
//!
//! let value = cache.get("config", || Ok("loaded".to_string())).unwrap();
//! assert_eq!(value.as_str(), "loaded");
//! ```
//!
//! ## Bounded waits
//! ```
//! use std::time::Duration;
//!
//! use coalesce_cache::MemoCache;
//!
//! let cache: MemoCache<&str, u8, String> = MemoCache::new();
//! let value = cache.get_timeout("k", Duration::from_millis(50), || Ok(1)).unwrap();
//! assert_eq!(*value, 1);
//! ```

#[cfg(feature = "async")]
mod async_core;
mod config;
mod core;
mod slot;
mod stats;
mod traits;

// Re-export public API
pub use self::core::MemoCache;

#[cfg(feature = "async")]
pub use async_core::AsyncMemoCache;
pub use config::{MemoConfig, MemoConfigBuilder, DEFAULT_CACHE_NAME};
pub use stats::MemoStats;
pub use traits::Computable;
