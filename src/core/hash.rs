//! Canonical State Hashing
//!
//! A `StateHash` is what authority and replicas compare: it is sealed into
//! every turn record, stored with every snapshot and recomputed on replay.
//! Two states hash equal only if every field was fed in the same order with
//! the same encoding, so all integers go in little-endian and every variable
//! length item carries its length or a presence tag.

use sha2::{Sha256, Digest};

/// SHA-256 digest of a canonical encoding.
pub type StateHash = [u8; 32];

const STATE_DOMAIN: &[u8] = b"BOARDSYNC_STATE_V1";

/// Typed front-end over SHA-256.
pub struct StateHasher {
    inner: Sha256,
}

impl StateHasher {
    pub fn new(domain: &[u8]) -> Self {
        let mut inner = Sha256::new();
        inner.update(domain);
        Self { inner }
    }

    pub fn update_u8(&mut self, value: u8) {
        self.inner.update([value]);
    }

    pub fn update_u16(&mut self, value: u16) {
        self.inner.update(value.to_le_bytes());
    }

    pub fn update_u32(&mut self, value: u32) {
        self.inner.update(value.to_le_bytes());
    }

    pub fn update_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    pub fn update_i64(&mut self, value: i64) {
        self.inner.update(value.to_le_bytes());
    }

    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(u8::from(value));
    }

    /// Player and session ids.
    pub fn update_id(&mut self, id: &[u8; 16]) {
        self.inner.update(id);
    }

    /// Length-prefixed, so `"ab","c"` and `"a","bc"` differ.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.inner.update(value.as_bytes());
    }

    /// Presence byte, then the value if any.
    pub fn update_option<T, F>(&mut self, value: Option<T>, add: F)
    where
        F: FnOnce(&mut Self, T),
    {
        self.update_bool(value.is_some());
        if let Some(v) = value {
            add(self, v);
        }
    }

    pub fn finalize(self) -> StateHash {
        self.inner.finalize().into()
    }
}

/// One-shot digest of `data` under `domain`.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = StateHasher::new(domain);
    hasher.inner.update(data);
    hasher.finalize()
}

/// Hash a game state. Turn and seed lead; `add_state` feeds the rest.
pub fn compute_state_hash<F>(turn: u64, rng_seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::new(STATE_DOMAIN);
    hasher.update_u64(turn);
    hasher.update_u64(rng_seed);
    add_state(&mut hasher);
    hasher.finalize()
}

/// First six bytes as hex, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..6])
}
