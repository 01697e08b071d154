//! Quorum-based distributed locking over independent Redis masters.
//!
//! This crate implements the Redlock algorithm: a lock is held when a strict
//! majority of the configured masters accepted a `SET key token NX PX`
//! write, and only for the portion of the lease that is still safe after
//! subtracting round-trip time and a clock-drift allowance.
//!
//! # How It Works
//!
//! An acquisition generates a fresh random 128-bit token, fans the
//! set-if-absent write out to every master in parallel (each attempt bounded
//! so a slow master cannot consume the whole lease), counts the grants, and
//! computes the remaining validity window. Both must pass: a strict majority
//! of grants *and* a positive validity window. Release and extension prove
//! ownership by presenting the token to a server-side script, so another
//! holder's key is never deleted or refreshed by mistake.
//!
//! # Guarantees
//!
//! With `N` masters, mutual exclusion holds for the reported validity window
//! provided at most `⌊N/2⌋` masters fail and wall clocks drift by less than
//! the configured `clock_drift_factor` of the lease. `N = 1` degenerates to
//! a single-master lock with quorum 1.
//!
//! # Example
//!
//! ```ignore
//! use conclave_core::{MasterConfig, MasterSet};
//! use conclave_lock::{LockConfig, Redlock};
//!
//! let masters = MasterSet::new(&[
//!     MasterConfig::new("redis://10.0.0.1:6379"),
//!     MasterConfig::new("redis://10.0.0.2:6379"),
//!     MasterConfig::new("redis://10.0.0.3:6379"),
//! ])?;
//! let mut lock = Redlock::new(masters, LockConfig::new("shower"))?;
//!
//! let guard = lock.hold().await?;
//! // Critical section...
//! guard.release().await?;
//! ```

pub mod config;
pub mod error;
pub mod redlock;
pub mod scripts;

pub use config::LockConfig;
pub use error::LockError;
pub use redlock::{Redlock, RedlockGuard};
