//! Game Events
//!
//! Notifications produced while the engine advances. Events are derived from
//! recorded actions and released to subscribers in commit order.

use serde::{Serialize, Deserialize};

use crate::error::EngineError;
use crate::game::effects::{EffectOutcome, TradeOffer};
use crate::game::state::PlayerId;
use crate::game::turn::TurnPhase;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventData {
    /// A player's turn began
    TurnStarted { player: PlayerId },

    /// The active player rolled
    DiceRolled { player: PlayerId, roll: u8 },

    /// One effect finished resolving
    EffectResolved { outcome: EffectOutcome },

    /// A recorded action failed after validation
    TurnFailed { player: PlayerId, error: EngineError },

    /// A deadline fired and the default action skipped the rest of the turn
    TurnAutoPassed { player: PlayerId, phase: TurnPhase },

    /// A trade offer was opened
    TradeOffered { offer: TradeOffer },

    /// Connection dropped
    PlayerDisconnected { player: PlayerId },

    /// Player rejoined
    PlayerReconnected { player: PlayerId },

    /// Game ended
    GameOver { winner: Option<PlayerId> },
}

/// A game event stamped with the turn it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Turn number when the event occurred
    pub turn: u64,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    pub fn new(turn: u64, data: GameEventData) -> Self {
        Self { turn, data }
    }

    /// The player most directly involved, if any.
    pub fn player(&self) -> Option<PlayerId> {
        match &self.data {
            GameEventData::TurnStarted { player }
            | GameEventData::DiceRolled { player, .. }
            | GameEventData::TurnFailed { player, .. }
            | GameEventData::TurnAutoPassed { player, .. }
            | GameEventData::PlayerDisconnected { player }
            | GameEventData::PlayerReconnected { player } => Some(*player),
            GameEventData::TradeOffered { offer } => Some(offer.proposer),
            GameEventData::GameOver { winner } => *winner,
            GameEventData::EffectResolved { .. } => None,
        }
    }

    /// Connection events bypass the commit buffer.
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self.data,
            GameEventData::PlayerDisconnected { .. } | GameEventData::PlayerReconnected { .. }
        )
    }
}
