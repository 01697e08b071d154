//! Monotonically increasing integer IDs coordinated across independent Redis
//! masters.
//!
//! Each master holds a per-sequence counter. A [`NextId::next`] call advances
//! the counter on every master inside an optimistic transaction scope, takes
//! the maximum over the masters that committed, and forward-propagates that
//! maximum to any master that fell behind. IDs returned by a single process
//! strictly increase; holes are permitted and expected under concurrency.

pub mod error;
pub mod generator;
pub mod scripts;

pub use error::IdError;
pub use generator::NextId;
