//! Shared substrate for the Conclave coordination primitives.
//!
//! Everything the higher-level crates have in common lives here: the
//! canonical value encoding, the error taxonomy, per-master connection
//! pooling with quorum-aware fan-out, the retry/back-off strategy, and the
//! optimistic `WATCH`/`MULTI`/`EXEC` transaction scope.

pub mod encoding;
pub mod error;
pub mod masters;
pub mod retry;
pub mod transaction;

pub use error::CoreError;
pub use masters::{MasterConfig, MasterSet};
pub use retry::RetryStrategy;
pub use transaction::optimistic;
