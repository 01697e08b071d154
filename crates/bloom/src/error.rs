use thiserror::Error;

use conclave_core::CoreError;

/// Errors from Bloom filter operations.
#[derive(Debug, Error)]
pub enum BloomError {
    /// The sizing parameters are out of range.
    #[error("invalid filter parameters: {0}")]
    Parameters(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
