//! Concurrent memoizing cache primitives for Coalesce.
//!
//! The crate provides a keyed store that computes the value for a key at most
//! once, even when many callers request that key at the same time, and hands
//! the single computed result to every caller.
//!
//! # Feature Flags
//!
//! - `async` (default): [`AsyncMemoCache`] for callers on the tokio runtime
//!
//! # Logging
//!
//! Cache activity is reported through `tracing`. The crate never installs a
//! subscriber; that is up to the binary.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod memo;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use error::{ErrorClassification, ErrorSeverity, MemoError};
#[cfg(feature = "async")]
pub use memo::AsyncMemoCache;
pub use memo::{Computable, MemoCache, MemoConfig, MemoConfigBuilder, MemoStats};

/// Result type returned by memo cache lookups
pub type MemoResult<V, E> = Result<std::sync::Arc<V>, MemoError<E>>;
