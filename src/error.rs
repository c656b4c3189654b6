//! Engine Errors
//!
//! Two layers: [`RejectReason`] explains why an intent was refused before it
//! touched any state, and [`EngineError`] is the full taxonomy surfaced by the
//! engine, journal and session layers.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Why an intent failed validation.
///
/// A rejected intent is never recorded and never mutates state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Sender is not the active player.
    #[error("not your turn")]
    NotYourTurn,

    /// Intent is not accepted in the current phase.
    #[error("intent not valid in phase {phase}")]
    InvalidPhase { phase: String },

    /// Sequence number already accepted or queued.
    #[error("duplicate intent sequence {sequence} (last accepted {last_accepted})")]
    DuplicateIntent { sequence: u64, last_accepted: u64 },

    /// Game has ended.
    #[error("game over")]
    GameOver,

    /// Sender is not seated in this session.
    #[error("unknown player")]
    UnknownPlayer,

    /// Sender has gone bankrupt and no longer acts.
    #[error("player is bankrupt")]
    Bankrupt,

    /// Intent payload is malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Sender lacks the resources the intent needs.
    #[error("cannot afford")]
    CannotAfford,

    /// Referenced card is not in the sender's hand.
    #[error("no such card in hand")]
    NoSuchCard,

    /// Card has no playable actions.
    #[error("card cannot be played")]
    CardNotPlayable,

    /// Referenced trade offer was never issued this turn.
    #[error("no such trade offer")]
    NoSuchOffer,

    /// Current tile cannot be bought.
    #[error("tile cannot be purchased")]
    TileNotPurchasable,

    /// Deadline action no longer matches the live phase.
    #[error("stale deadline")]
    StaleDeadline,

    /// Credential did not verify.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Player was gone longer than the reconnection window.
    #[error("reconnect window expired")]
    ReconnectWindowExpired,
}

/// Engine, journal and session errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum EngineError {
    /// Intent refused before any mutation.
    #[error("rejected: {0}")]
    Validation(#[from] RejectReason),

    /// A validated action found its preconditions changed by the time it resolved.
    #[error("precondition no longer met: {0}")]
    PreconditionNoLongerMet(String),

    /// Resolution enqueued more effects than allowed; state rolled back.
    #[error("effect loop detected: {enqueued} effects enqueued (limit {limit})")]
    EffectLoopDetected { enqueued: usize, limit: usize },

    /// Replayed state diverged from the recorded checksum.
    #[error("desync at record {sequence}: expected {expected}, got {actual}")]
    DesyncDetected {
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// Authority unreachable past the grace period.
    #[error("authority lost")]
    AuthorityLost,

    /// Snapshot or record failed to decode or verify.
    #[error("journal corrupted: {0}")]
    JournalCorrupted(String),

    /// Mutation attempted on a replica.
    #[error("not authoritative")]
    NotAuthoritative,

    /// Record appended with a sequence gap.
    #[error("record out of order: expected {expected}, got {got}")]
    RecordOutOfOrder { expected: u64, got: u64 },

    /// Session has not started, is suspended, or has terminated.
    #[error("session not active")]
    SessionNotActive,

    /// No retained record for that turn.
    #[error("turn {0} not found")]
    TurnNotFound(u64),
}

impl EngineError {
    /// Fatal errors end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::AuthorityLost | EngineError::JournalCorrupted(_))
    }

    /// Build a desync error from two checksums.
    pub fn desync(sequence: u64, expected: &[u8; 32], actual: &[u8; 32]) -> Self {
        EngineError::DesyncDetected {
            sequence,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// The rejection reason, if this is a validation failure.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            EngineError::Validation(reason) => Some(reason),
            _ => None,
        }
    }
}
