//! A probabilistic set over a single Redis bit array.
//!
//! The filter is sized at construction from a target population and a
//! tolerated false-positive probability, using the standard optimal-parameter
//! formulas. Membership bits are derived client-side with enhanced double
//! hashing over a SHA-256 of the element's canonical encoding, so every
//! process computing positions for the same element agrees on them.
//!
//! `contains` answering `false` is definitive; `true` is probabilistic at
//! the configured rate. Bits set by `add` stay set until [`clear`] drops the
//! whole array.
//!
//! [`clear`]: BloomFilter::clear

pub mod error;
pub mod filter;

pub use error::BloomError;
pub use filter::BloomFilter;
