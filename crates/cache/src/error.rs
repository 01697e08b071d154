use thiserror::Error;

use conclave_core::CoreError;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The wrapped function itself failed; nothing was cached.
    #[error("wrapped function failed: {0}")]
    Function(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
