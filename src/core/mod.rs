//! Core deterministic primitives.
//!
//! Seeded randomness and canonical snapshot hashing. Nothing in here
//! touches the clock, the network or the store.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{CoinFlip, DeterministicRng, FixedCoin};
pub use hash::{StateHash, snapshot_hash};
