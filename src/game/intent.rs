//! Player Intents
//!
//! Intents are proposals; nothing is validated until the engine dequeues
//! them. The queue serializes intents from every connection into one order.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::error::RejectReason;
use crate::game::effects::TradeTerms;
use crate::game::state::{CardInstanceId, PlayerId};

/// Actions a player can request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RollDice,
    Move,
    PlayCard { card: CardInstanceId },
    BuyTile,
    ProposeTrade { terms: TradeTerms, target: Option<PlayerId> },
    AcceptTrade { offer_id: u64 },
    CancelTrade { offer_id: u64 },
    EndTurn,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::RollDice => "roll_dice",
            Intent::Move => "move",
            Intent::PlayCard { .. } => "play_card",
            Intent::BuyTile => "buy_tile",
            Intent::ProposeTrade { .. } => "propose_trade",
            Intent::AcceptTrade { .. } => "accept_trade",
            Intent::CancelTrade { .. } => "cancel_trade",
            Intent::EndTurn => "end_turn",
        }
    }
}

/// An intent waiting in the queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub player: PlayerId,
    /// Per-player, strictly increasing.
    pub sequence: u64,
    pub intent: Intent,
}

/// FIFO of pending intents.
#[derive(Debug, Default)]
pub struct IntentQueue {
    pending: VecDeque<PendingIntent>,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an intent. A second intent with the same (player, sequence)
    /// while the first is still pending is a duplicate.
    pub fn push(&mut self, intent: PendingIntent) -> Result<(), RejectReason> {
        let duplicate = self
            .pending
            .iter()
            .any(|p| p.player == intent.player && p.sequence == intent.sequence);
        if duplicate {
            let last_accepted = self
                .pending
                .iter()
                .filter(|p| p.player == intent.player)
                .map(|p| p.sequence)
                .max()
                .unwrap_or(intent.sequence);
            return Err(RejectReason::DuplicateIntent {
                sequence: intent.sequence,
                last_accepted,
            });
        }
        self.pending.push_back(intent);
        Ok(())
    }

    /// Remove a pending intent. Returns false if it was already dequeued.
    pub fn withdraw(&mut self, player: &PlayerId, sequence: u64) -> bool {
        match self
            .pending
            .iter()
            .position(|p| p.player == *player && p.sequence == sequence)
        {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn pop(&mut self) -> Option<PendingIntent> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending intents for one player, in queue order.
    pub fn pending_for(&self, player: &PlayerId) -> impl Iterator<Item = &PendingIntent> {
        let player = *player;
        self.pending.iter().filter(move |p| p.player == player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(n: u8, sequence: u64, intent: Intent) -> PendingIntent {
        PendingIntent { player: PlayerId::new([n; 16]), sequence, intent }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = IntentQueue::new();
        queue.push(pending(1, 1, Intent::RollDice)).expect("push");
        queue.push(pending(2, 1, Intent::AcceptTrade { offer_id: 1 })).expect("push");
        queue.push(pending(1, 2, Intent::Move)).expect("push");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().map(|p| p.intent), Some(Intent::RollDice));
        assert_eq!(queue.pop().map(|p| p.sequence), Some(1));
        assert_eq!(queue.pop().map(|p| p.intent), Some(Intent::Move));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_pending_rejected() {
        let mut queue = IntentQueue::new();
        queue.push(pending(1, 4, Intent::RollDice)).expect("push");
        let err = queue.push(pending(1, 4, Intent::EndTurn));
        assert_eq!(err, Err(RejectReason::DuplicateIntent { sequence: 4, last_accepted: 4 }));

        // Same sequence from another player is fine
        queue.push(pending(2, 4, Intent::EndTurn)).expect("push");
    }

    #[test]
    fn test_withdraw_until_dequeued() {
        let mut queue = IntentQueue::new();
        queue.push(pending(1, 1, Intent::RollDice)).expect("push");
        queue.push(pending(1, 2, Intent::Move)).expect("push");

        assert!(queue.withdraw(&PlayerId::new([1; 16]), 2));
        assert!(!queue.withdraw(&PlayerId::new([1; 16]), 2));

        let popped = queue.pop().expect("pop");
        assert!(!queue.withdraw(&popped.player, popped.sequence));
        assert_eq!(queue.pending_for(&PlayerId::new([1; 16])).count(), 0);
    }

    #[test]
    fn test_intent_json_shape() {
        let json = serde_json::to_string(&Intent::PlayCard { card: CardInstanceId(3) }).expect("json");
        assert_eq!(json, r#"{"play_card":{"card":3}}"#);
        let back: Intent = serde_json::from_str(r#""roll_dice""#).expect("parse");
        assert_eq!(back, Intent::RollDice);
    }
}
