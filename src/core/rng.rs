//! Session RNG
//!
//! Every random decision in a session (dice, card draws, event draws) comes
//! from one Xorshift128+ stream seeded at session start. The stream state and
//! its draw count travel inside snapshots, so a replica that restores a
//! snapshot draws exactly what the authority will draw next.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

const SEED_DOMAIN: &[u8] = b"BOARDSYNC_SEED_V1";

/// Xorshift128+ stream with a draw counter.
///
/// ```
/// use boardsync::core::rng::DeterministicRng;
///
/// let mut authority = DeterministicRng::new(42);
/// let mut replica = authority.clone();
/// assert_eq!(authority.roll_die(6), replica.roll_die(6));
/// assert_eq!(replica.draws(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    lanes: [u64; 2],
    draws: u64,
}

impl DeterministicRng {
    /// Expand `seed` into the two state lanes with SplitMix64.
    pub fn new(seed: u64) -> Self {
        let mut cursor = seed;
        let lanes = [splitmix64(&mut cursor), splitmix64(&mut cursor)];
        Self {
            lanes: if lanes == [0, 0] { [1, 1] } else { lanes },
            draws: 0,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let [a, b] = self.lanes;
        let out = a.wrapping_add(b);
        let mixed = a ^ b;
        self.lanes = [a.rotate_left(24) ^ mixed ^ (mixed << 16), mixed.rotate_left(37)];
        self.draws += 1;
        out
    }

    /// Uniform value in `0..bound`; `0` for an empty range without drawing.
    ///
    /// Rejection sampling keeps faces unbiased for any bound.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let zone = u64::MAX - u64::MAX % bound;
        loop {
            let value = self.next_u64();
            if value < zone {
                return value % bound;
            }
        }
    }

    /// One die roll, `1..=sides`.
    pub fn roll_die(&mut self, sides: u8) -> u8 {
        match sides {
            0 => 0,
            n => self.below(u64::from(n)) as u8 + 1,
        }
    }

    /// Pick one entry of a deck. Empty decks consume no draw.
    pub fn choose<'a, T>(&mut self, deck: &'a [T]) -> Option<&'a T> {
        if deck.is_empty() {
            return None;
        }
        let index = self.below(deck.len() as u64) as usize;
        deck.get(index)
    }

    /// Draws taken since seeding.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Raw lanes, for hashing.
    pub fn state(&self) -> [u64; 2] {
        self.lanes
    }
}

fn splitmix64(cursor: &mut u64) -> u64 {
    *cursor = cursor.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *cursor;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for a session: SHA-256 over the session id, the roster and `salt`.
///
/// `player_ids` must already be sorted so seat order cannot move the seed.
/// The orchestrator passes the content fingerprint as `salt`, which ties the
/// stream to the tables it will be drawn against.
pub fn derive_session_seed(session_id: &[u8; 16], player_ids: &[[u8; 16]], salt: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(SEED_DOMAIN);
    hasher.update(session_id);
    hasher.update((player_ids.len() as u32).to_le_bytes());
    for id in player_ids {
        hasher.update(id);
    }
    hasher.update(salt);

    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}
