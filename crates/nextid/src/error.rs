use thiserror::Error;

use conclave_core::CoreError;

/// Errors from ID generation.
#[derive(Debug, Error)]
pub enum IdError {
    /// Fewer than a strict majority of masters committed the advanced
    /// counter, even after retrying.
    #[error("quorum not achieved: {granted} of {masters} masters committed, quorum is {quorum}")]
    QuorumNotAchieved {
        granted: usize,
        quorum: usize,
        masters: usize,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}
