//! Turn Records
//!
//! One immutable entry per completed turn. Records carry every accepted
//! action so replay re-runs the same engine code, plus the outcomes and the
//! post-turn checksum replay is verified against.

use serde::{Serialize, Deserialize};

use crate::core::hash::{short_hex, StateHash};
use crate::error::EngineError;
use crate::game::effects::EffectOutcome;
use crate::game::state::PlayerId;
use crate::game::turn::TurnAction;

/// The movement made this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub from: u16,
    pub to: u16,
    pub steps: u16,
    pub passed_start: bool,
}

/// Append-only log entry for one turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Equal to the turn number
    pub sequence: u64,

    /// Player whose turn it was
    pub acting_player: PlayerId,

    /// Accepted actions, in order
    pub actions: Vec<TurnAction>,

    /// Die result, if rolled
    pub roll: Option<u8>,

    /// Movement, if any
    pub movement: Option<Movement>,

    /// Resolved effects, in order
    pub outcomes: Vec<EffectOutcome>,

    /// Turn-level failures (failed preconditions, aborted resolutions)
    pub failures: Vec<EngineError>,

    /// State checksum after the turn's final transition
    pub checksum: StateHash,
}

impl TurnRecord {
    /// Short checksum for logs.
    pub fn checksum_hex(&self) -> String {
        short_hex(&self.checksum)
    }

    /// Encode for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        bincode::serialize(self).map_err(|e| EngineError::JournalCorrupted(e.to_string()))
    }

    /// Decode from storage.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        bincode::deserialize(data).map_err(|e| EngineError::JournalCorrupted(e.to_string()))
    }
}

/// Builder for the in-flight record of the current turn.
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    sequence: u64,
    acting_player: PlayerId,
    actions: Vec<TurnAction>,
    roll: Option<u8>,
    movement: Option<Movement>,
    outcomes: Vec<EffectOutcome>,
    failures: Vec<EngineError>,
}

impl RecordBuilder {
    pub fn new(sequence: u64, acting_player: PlayerId) -> Self {
        Self {
            sequence,
            acting_player,
            actions: Vec::new(),
            roll: None,
            movement: None,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn acting_player(&self) -> PlayerId {
        self.acting_player
    }

    /// Actions accepted so far this turn.
    pub fn actions(&self) -> &[TurnAction] {
        &self.actions
    }

    /// Index the next outcome will take.
    pub fn next_outcome_index(&self) -> u32 {
        self.outcomes.len() as u32
    }

    pub fn push_action(&mut self, action: TurnAction) {
        self.actions.push(action);
    }

    pub fn set_roll(&mut self, roll: u8) {
        self.roll = Some(roll);
    }

    pub fn set_movement(&mut self, movement: Movement) {
        self.movement = Some(movement);
    }

    pub fn extend_outcomes(&mut self, outcomes: &[EffectOutcome]) {
        self.outcomes.extend_from_slice(outcomes);
    }

    pub fn push_failure(&mut self, failure: EngineError) {
        self.failures.push(failure);
    }

    /// Seal the record with the post-turn checksum.
    pub fn seal(self, checksum: StateHash) -> TurnRecord {
        TurnRecord {
            sequence: self.sequence,
            acting_player: self.acting_player,
            actions: self.actions,
            roll: self.roll,
            movement: self.movement,
            outcomes: self.outcomes,
            failures: self.failures,
            checksum,
        }
    }
}
