//! Game Snapshots
//!
//! Full-state captures taken at turn boundaries. Encoded with bincode and
//! guarded by the state checksum; a snapshot that fails to decode or verify
//! is reported as `JournalCorrupted`.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::{short_hex, StateHash};
use crate::error::EngineError;
use crate::game::state::GameState;

/// A full copy of game state at a record boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Session this snapshot belongs to
    pub session_id: [u8; 16],

    /// Last record folded into this state (0 before any record)
    pub sequence: u64,

    /// Wall-clock capture time; not part of the checksum
    pub captured_at: DateTime<Utc>,

    /// Content tables the state was produced with
    pub content_fingerprint: StateHash,

    /// The state itself (includes RNG seed, state and draw cursor)
    pub state: GameState,

    /// `state.compute_hash()` at capture
    pub checksum: StateHash,
}

impl GameSnapshot {
    /// Capture `state` as of record `sequence`.
    pub fn capture(
        session_id: [u8; 16],
        sequence: u64,
        state: &GameState,
        content_fingerprint: StateHash,
    ) -> Self {
        Self {
            session_id,
            sequence,
            captured_at: Utc::now(),
            content_fingerprint,
            state: state.clone(),
            checksum: state.compute_hash(),
        }
    }

    /// Check the embedded checksum.
    pub fn verify(&self) -> Result<(), EngineError> {
        let actual = self.state.compute_hash();
        if actual != self.checksum {
            return Err(EngineError::JournalCorrupted(format!(
                "snapshot {} checksum mismatch: stored {}, computed {}",
                self.sequence,
                short_hex(&self.checksum),
                short_hex(&actual),
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        bincode::serialize(self).map_err(|e| EngineError::JournalCorrupted(e.to_string()))
    }

    /// Decode and verify.
    pub fn decode(data: &[u8]) -> Result<Self, EngineError> {
        let snapshot: GameSnapshot = bincode::deserialize(data)
            .map_err(|e| EngineError::JournalCorrupted(e.to_string()))?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    pub fn checksum_hex(&self) -> String {
        short_hex(&self.checksum)
    }
}
