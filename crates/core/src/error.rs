use thiserror::Error;

/// Errors from the encoding and transaction substrate.
///
/// Transport-level failures (`Connection`, `Backend`, `Timeout`) are absorbed
/// at the quorum layer of the higher-level crates and counted as a per-master
/// failure; they only surface directly from single-endpoint operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transaction contention: watched keys kept changing after {retries} retries")]
    Contention { retries: u32 },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
