//! Function-result caching over a single Redis hash.
//!
//! A [`CachedFunction`] wraps a caller-supplied [`Callable`] and stores its
//! return values in one Redis hash, keyed by a deterministic fingerprint of
//! the canonicalized call arguments. Hits decode the stored value; misses
//! invoke the wrapped function and write the result back. The hash also
//! carries cumulative hit/miss counters.
//!
//! Wrapped functions are required to be pure: two concurrent misses may both
//! compute and both write, the last write wins, and both callers are served
//! the value they personally computed.

pub mod arguments;
pub mod cache;
pub mod error;

pub use arguments::Arguments;
pub use cache::{CacheInfo, CachedFunction, Callable};
pub use error::CacheError;
