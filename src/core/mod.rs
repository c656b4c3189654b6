//! Core deterministic primitives.
//!
//! Everything the authoritative engine and its replicas must agree on
//! bit-for-bit: the seeded RNG and the state hasher.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, derive_session_seed};
pub use hash::{StateHash, StateHasher, compute_state_hash};
