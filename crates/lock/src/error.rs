use thiserror::Error;

use conclave_core::CoreError;

/// Errors from Redlock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Fewer than a strict majority of masters granted the operation.
    #[error("quorum not achieved: {granted} of {masters} masters granted, quorum is {quorum}")]
    QuorumNotAchieved {
        granted: usize,
        quorum: usize,
        masters: usize,
    },

    /// `acquire` was called while the handle already holds the lock.
    #[error("lock is already held by this handle")]
    AlreadyAcquired,

    /// `release` was called while the handle does not hold the lock, or the
    /// masters no longer recognize this handle's token.
    #[error("cannot release a lock this handle does not hold")]
    ReleaseUnlocked,

    /// `extend` was called while the handle does not hold the lock, or the
    /// masters no longer recognize this handle's token.
    #[error("cannot extend a lock this handle does not hold")]
    ExtendUnlocked,

    /// The acquisition has already been extended the configured maximum
    /// number of times.
    #[error("extension limit reached: {0} extensions already used")]
    ExtensionLimit(u32),

    /// Redlock requires an odd number of masters.
    #[error("masters must be an odd number of endpoints, got {0}")]
    EvenMasters(usize),

    #[error(transparent)]
    Core(#[from] CoreError),
}
