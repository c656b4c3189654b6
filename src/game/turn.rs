//! Turn State Machine
//!
//! Drives phase progression for the active player:
//!
//! ```text
//! AwaitingRoll ─RollDice─► Moving ─Move─► ResolvingEffects ─► FreeAction ─EndTurn─► EndTurn
//!      ▲                                                                              │
//!      └──────────────────────────── next solvent seat ◄───────────────────────────┘
//! ```
//!
//! `GameOver` is terminal and reachable whenever a victory condition fires.
//!
//! The engine is a pure function of (state, action). Every accepted action is
//! appended to the in-flight [`RecordBuilder`]; when the turn ends the record
//! is sealed with the post-transition checksum. Replaying a record's actions
//! against the state it started from reproduces that checksum.

use std::sync::Arc;
use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::core::hash::StateHasher;
use crate::error::{EngineError, RejectReason};
use crate::game::content::ContentRegistry;
use crate::game::effects::{move_player, Effect, EffectOutcome, OutcomeStatus, StateChange, TradeOffer};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::intent::Intent;
use crate::game::pipeline::EffectPipeline;
use crate::game::state::{ConnectionStatus, GameState, PlayerId, StatusKind, TileKind};
use crate::journal::record::{Movement, RecordBuilder, TurnRecord};

// =============================================================================
// PHASES & ACTIONS
// =============================================================================

/// Turn phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum TurnPhase {
    /// Waiting for the active player to roll
    #[default]
    AwaitingRoll,
    /// Rolled; waiting for the move
    Moving { roll: u8 },
    /// Pipeline running (transient)
    ResolvingEffects,
    /// Cards, purchases and trades
    FreeAction,
    /// Turn wrap-up (transient)
    EndTurn,
    /// Terminal
    GameOver { winner: Option<PlayerId> },
}

impl TurnPhase {
    pub fn is_game_over(&self) -> bool {
        matches!(self, TurnPhase::GameOver { .. })
    }

    /// Phases that wait for input and therefore carry a deadline.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            TurnPhase::AwaitingRoll | TurnPhase::Moving { .. } | TurnPhase::FreeAction
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnPhase::AwaitingRoll => "awaiting_roll",
            TurnPhase::Moving { .. } => "moving",
            TurnPhase::ResolvingEffects => "resolving_effects",
            TurnPhase::FreeAction => "free_action",
            TurnPhase::EndTurn => "end_turn",
            TurnPhase::GameOver { .. } => "game_over",
        }
    }

    pub(crate) fn hash_into(&self, hasher: &mut StateHasher) {
        match self {
            TurnPhase::AwaitingRoll => hasher.update_u8(0),
            TurnPhase::Moving { roll } => {
                hasher.update_u8(1);
                hasher.update_u8(*roll);
            }
            TurnPhase::ResolvingEffects => hasher.update_u8(2),
            TurnPhase::FreeAction => hasher.update_u8(3),
            TurnPhase::EndTurn => hasher.update_u8(4),
            TurnPhase::GameOver { winner } => {
                hasher.update_u8(5);
                hasher.update_option(*winner, |h, w| h.update_id(&w.0));
            }
        }
    }

    fn invalid(&self) -> EngineError {
        RejectReason::InvalidPhase { phase: self.name().to_string() }.into()
    }
}

/// Everything that can advance the engine. Recorded verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    /// A validated player intent
    Intent { player: PlayerId, sequence: u64, intent: Intent },
    /// A phase deadline fired
    DeadlineElapsed { player: PlayerId, phase: TurnPhase },
    /// A player's connection status changed
    ConnectionChanged { player: PlayerId, status: ConnectionStatus },
}

/// What one applied action produced.
#[derive(Debug, Default)]
pub struct StepResult {
    /// Events in the order they occurred
    pub events: Vec<GameEvent>,
    /// Effect outcomes resolved by this action
    pub outcomes: Vec<EffectOutcome>,
    /// Record sealed by this action, if the turn ended
    pub completed: Option<TurnRecord>,
    /// Failure recorded for this action, reported to the sender
    pub failure: Option<EngineError>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Authoritative turn engine.
pub struct TurnEngine {
    state: GameState,
    content: Arc<ContentRegistry>,
    rules: RulesConfig,
    pipeline: EffectPipeline,
    current: Option<RecordBuilder>,
}

impl TurnEngine {
    /// Wrap a state. A state at a turn boundary resumes that turn with an
    /// empty in-flight record; a fresh state waits for [`TurnEngine::start`].
    pub fn new(state: GameState, content: Arc<ContentRegistry>, rules: RulesConfig) -> Self {
        let current = match (state.turn_number, state.active_player_id()) {
            (0, _) | (_, None) => None,
            (turn, Some(active)) => Some(RecordBuilder::new(turn, active)),
        };
        Self {
            pipeline: EffectPipeline::new(&rules),
            state,
            content,
            rules,
            current,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn into_state(self) -> GameState {
        self.state
    }

    pub fn content(&self) -> &Arc<ContentRegistry> {
        &self.content
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.state.phase
    }

    pub fn is_started(&self) -> bool {
        self.state.turn_number > 0
    }

    pub fn is_game_over(&self) -> bool {
        self.state.phase.is_game_over()
    }

    /// Actions accepted so far in the current turn.
    pub fn in_flight_actions(&self) -> &[TurnAction] {
        self.current.as_ref().map_or(&[], |b| b.actions())
    }

    /// Begin turn 1 with seat 0.
    pub fn start(&mut self) -> Result<StepResult, EngineError> {
        if self.is_started() {
            return Err(RejectReason::InvalidPhase { phase: "started".into() }.into());
        }
        if self.state.players.is_empty() {
            return Err(RejectReason::UnknownPlayer.into());
        }

        self.state.turn_number = 1;
        self.state.active_seat = 0;
        self.state.phase = TurnPhase::AwaitingRoll;
        for (seat, player) in self.state.players.iter_mut().enumerate() {
            player.is_active_turn = seat == 0;
        }

        let first = self.state.players[0].id;
        self.current = Some(RecordBuilder::new(1, first));

        let mut step = StepResult::default();
        self.emit(&mut step, GameEventData::TurnStarted { player: first });
        Ok(step)
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Check an action without touching state.
    pub fn validate(&self, action: &TurnAction) -> Result<(), EngineError> {
        if self.is_game_over() {
            return Err(RejectReason::GameOver.into());
        }
        if self.current.is_none() {
            return Err(EngineError::SessionNotActive);
        }

        match action {
            TurnAction::ConnectionChanged { player, .. } => {
                if self.state.player(player).is_none() {
                    return Err(RejectReason::UnknownPlayer.into());
                }
                Ok(())
            }
            TurnAction::DeadlineElapsed { player, phase } => {
                let live = self.state.active_player_id() == Some(*player)
                    && *phase == self.state.phase
                    && phase.is_waiting();
                if live {
                    Ok(())
                } else {
                    Err(RejectReason::StaleDeadline.into())
                }
            }
            TurnAction::Intent { player, sequence, intent } => {
                self.validate_intent(*player, *sequence, intent)
            }
        }
    }

    fn validate_intent(&self, player: PlayerId, sequence: u64, intent: &Intent) -> Result<(), EngineError> {
        let sender = self.state.player(&player).ok_or(RejectReason::UnknownPlayer)?;
        if sender.bankrupt {
            return Err(RejectReason::Bankrupt.into());
        }
        if sequence <= sender.last_intent_seq {
            return Err(RejectReason::DuplicateIntent {
                sequence,
                last_accepted: sender.last_intent_seq,
            }
            .into());
        }

        let phase = &self.state.phase;
        let is_active = self.state.active_player_id() == Some(player);

        if let Intent::AcceptTrade { offer_id } = intent {
            if *phase != TurnPhase::FreeAction {
                return Err(phase.invalid());
            }
            let offer = self.state.offer(*offer_id).ok_or(RejectReason::NoSuchOffer)?;
            if offer.proposer == player {
                return Err(RejectReason::InvalidPayload("cannot accept own offer".into()).into());
            }
            if offer.target.is_some_and(|t| t != player) {
                return Err(RejectReason::InvalidPayload("offer targets another player".into()).into());
            }
            return Ok(());
        }

        if !is_active {
            return Err(RejectReason::NotYourTurn.into());
        }

        match intent {
            Intent::RollDice => match phase {
                TurnPhase::AwaitingRoll => Ok(()),
                _ => Err(phase.invalid()),
            },
            Intent::Move => match phase {
                TurnPhase::Moving { .. } => Ok(()),
                _ => Err(phase.invalid()),
            },
            _ if *phase != TurnPhase::FreeAction => Err(phase.invalid()),
            Intent::PlayCard { card } => {
                let instance = sender.card(*card).ok_or(RejectReason::NoSuchCard)?;
                match self.content.card(&instance.key) {
                    Some(def) if def.is_playable() => Ok(()),
                    _ => Err(RejectReason::CardNotPlayable.into()),
                }
            }
            Intent::BuyTile => {
                let tile = self
                    .state
                    .board
                    .tile(sender.position)
                    .ok_or(RejectReason::TileNotPurchasable)?;
                match tile.kind {
                    TileKind::Property { price, .. } if tile.owner.is_none() => {
                        if sender.gold() >= price {
                            Ok(())
                        } else {
                            Err(RejectReason::CannotAfford.into())
                        }
                    }
                    _ => Err(RejectReason::TileNotPurchasable.into()),
                }
            }
            Intent::ProposeTrade { terms, target } => {
                if terms.give.has_negative() || terms.want.has_negative() {
                    return Err(RejectReason::InvalidPayload("negative trade amount".into()).into());
                }
                if terms.give.is_empty() && terms.want.is_empty() && terms.card.is_none() {
                    return Err(RejectReason::InvalidPayload("empty trade".into()).into());
                }
                if let Some(target) = target {
                    let valid = *target != player
                        && self.state.player(target).is_some_and(|p| !p.bankrupt);
                    if !valid {
                        return Err(RejectReason::InvalidPayload("invalid trade target".into()).into());
                    }
                }
                if !sender.resources.covers(&terms.give) {
                    return Err(RejectReason::CannotAfford.into());
                }
                if let Some(card) = terms.card {
                    sender.card(card).ok_or(RejectReason::NoSuchCard)?;
                }
                Ok(())
            }
            Intent::CancelTrade { offer_id } => match self.state.offer(*offer_id) {
                Some(o) if o.proposer == player && o.open => Ok(()),
                _ => Err(RejectReason::NoSuchOffer.into()),
            },
            Intent::EndTurn => Ok(()),
            Intent::AcceptTrade { .. } => Ok(()),
        }
    }

    // =========================================================================
    // APPLICATION
    // =========================================================================

    /// Validate and apply one action.
    ///
    /// `Err` means the action was rejected and nothing changed. `Ok` means the
    /// action was recorded; a failure during resolution is in
    /// [`StepResult::failure`].
    pub fn apply(&mut self, action: TurnAction) -> Result<StepResult, EngineError> {
        self.validate(&action)?;

        if let Some(builder) = self.current.as_mut() {
            builder.push_action(action.clone());
        }

        let mut step = StepResult::default();
        match action {
            TurnAction::ConnectionChanged { player, status } => {
                if let Some(p) = self.state.player_mut(&player) {
                    p.connection = status;
                }
            }
            TurnAction::DeadlineElapsed { player, phase } => match phase {
                TurnPhase::Moving { roll } => self.perform_move(player, roll, &mut step),
                _ => {
                    self.emit(&mut step, GameEventData::TurnAutoPassed { player, phase });
                    self.end_turn(&mut step);
                }
            },
            TurnAction::Intent { player, sequence, intent } => {
                if let Some(p) = self.state.player_mut(&player) {
                    p.last_intent_seq = sequence;
                }
                self.apply_intent(player, intent, &mut step);
            }
        }
        Ok(step)
    }

    fn apply_intent(&mut self, player: PlayerId, intent: Intent, step: &mut StepResult) {
        match intent {
            Intent::RollDice => {
                let roll = self.state.rng.roll_die(self.rules.dice_sides);
                if let Some(builder) = self.current.as_mut() {
                    builder.set_roll(roll);
                }
                self.state.phase = TurnPhase::Moving { roll };
                self.emit(step, GameEventData::DiceRolled { player, roll });
            }
            Intent::Move => {
                if let TurnPhase::Moving { roll } = self.state.phase {
                    self.perform_move(player, roll, step);
                }
            }
            Intent::PlayCard { card } => {
                self.free_action(player, Effect::CardPlay { player, card }, step);
            }
            Intent::BuyTile => {
                let tile = self.state.player(&player).map_or(0, |p| p.position);
                self.free_action(player, Effect::TilePurchase { player, tile }, step);
            }
            Intent::AcceptTrade { offer_id } => {
                self.free_action(player, Effect::Trade { offer_id, acceptor: player }, step);
            }
            Intent::ProposeTrade { terms, target } => {
                let offer = TradeOffer {
                    id: self.state.next_offer_id,
                    proposer: player,
                    target,
                    terms,
                    open: true,
                };
                self.state.next_offer_id += 1;
                self.state.trade_offers.push(offer.clone());
                self.emit(step, GameEventData::TradeOffered { offer });
            }
            Intent::CancelTrade { offer_id } => {
                if let Some(offer) = self.state.offer_mut(offer_id) {
                    offer.open = false;
                }
            }
            Intent::EndTurn => self.end_turn(step),
        }
    }

    /// Move the active player by the roll and resolve the landing.
    fn perform_move(&mut self, player: PlayerId, roll: u8, step: &mut StepResult) {
        let hastened = self
            .state
            .player(&player)
            .is_some_and(|p| p.has_status(StatusKind::Hastened));
        let steps = roll as u16 + if hastened { self.rules.haste_bonus } else { 0 };

        let (change, follow_ups) = move_player(&mut self.state, player, steps, &self.content);
        if let Some(StateChange::Moved { from, to, passed_start, .. }) = &change {
            if let Some(builder) = self.current.as_mut() {
                builder.set_movement(Movement { from: *from, to: *to, steps, passed_start: *passed_start });
            }
        }

        self.state.phase = TurnPhase::ResolvingEffects;
        let prior: Vec<StateChange> = change.into_iter().collect();
        self.run_pipeline(player, &prior, follow_ups, step);
        self.after_resolution(step);
    }

    /// Resolve a single free-action effect; its failure is the action's failure.
    fn free_action(&mut self, player: PlayerId, effect: Effect, step: &mut StepResult) {
        self.state.phase = TurnPhase::ResolvingEffects;
        self.run_pipeline(player, &[], vec![effect], step);

        if step.failure.is_none() {
            if let Some(OutcomeStatus::Failed { error }) = step.outcomes.first().map(|o| &o.status) {
                let error = error.clone();
                if let Some(builder) = self.current.as_mut() {
                    builder.push_failure(error.clone());
                }
                step.failure = Some(error);
            }
        }
        self.after_resolution(step);
    }

    fn run_pipeline(
        &mut self,
        player: PlayerId,
        prior: &[StateChange],
        initial: Vec<Effect>,
        step: &mut StepResult,
    ) {
        let first = self.current.as_ref().map_or(0, |b| b.next_outcome_index());
        let result = self.pipeline.resolve(
            &mut self.state,
            &self.content,
            &self.rules,
            prior,
            initial,
            first,
        );

        match result {
            Ok(outcomes) => {
                if let Some(builder) = self.current.as_mut() {
                    builder.extend_outcomes(&outcomes);
                }
                for outcome in &outcomes {
                    self.emit(step, GameEventData::EffectResolved { outcome: outcome.clone() });
                }
                step.outcomes = outcomes;
            }
            Err(error) => {
                if let Some(builder) = self.current.as_mut() {
                    builder.push_failure(error.clone());
                }
                self.emit(step, GameEventData::TurnFailed { player, error: error.clone() });
                step.failure = Some(error);
            }
        }
    }

    /// Leave `ResolvingEffects`: game over, forced end of turn, or free action.
    fn after_resolution(&mut self, step: &mut StepResult) {
        if let Some(winner) = self.mid_turn_winner() {
            self.game_over(winner, step);
            return;
        }
        let active_bankrupt = self
            .state
            .active_player()
            .map_or(true, |p| p.bankrupt);
        if active_bankrupt {
            self.end_turn(step);
        } else {
            self.state.phase = TurnPhase::FreeAction;
        }
    }

    fn mid_turn_winner(&self) -> Option<Option<PlayerId>> {
        let mut solvent = self.state.solvent_players();
        let reached = self
            .state
            .solvent_players()
            .any(|p| p.gold() >= self.rules.victory_gold);
        if reached {
            return Some(self.state.richest());
        }
        match (solvent.next(), solvent.next()) {
            (Some(_), Some(_)) => None,
            (only, None) => Some(only.map(|p| p.id)),
            (None, Some(_)) => None,
        }
    }

    fn end_turn(&mut self, step: &mut StepResult) {
        self.state.phase = TurnPhase::EndTurn;

        let seat = self.state.active_seat as usize;
        if let Some(actor) = self.state.players.get_mut(seat) {
            actor.decay_statuses();
        }
        self.state.trade_offers.clear();

        if let Some(winner) = self.mid_turn_winner() {
            self.game_over(winner, step);
            return;
        }
        if self.state.turn_number >= self.rules.max_turns {
            let winner = self.state.richest();
            self.game_over(winner, step);
            return;
        }

        let count = self.state.players.len();
        let next = (1..=count)
            .map(|offset| (seat + offset) % count)
            .find(|s| !self.state.players[*s].bankrupt);
        let next = match next {
            Some(n) => n,
            None => {
                self.game_over(None, step);
                return;
            }
        };

        for (s, player) in self.state.players.iter_mut().enumerate() {
            player.is_active_turn = s == next;
        }
        self.state.active_seat = next as u8;
        self.state.turn_number += 1;
        self.state.phase = TurnPhase::AwaitingRoll;

        let next_id = self.state.players[next].id;
        let checksum = self.state.compute_hash();
        let sealed = self
            .current
            .replace(RecordBuilder::new(self.state.turn_number, next_id))
            .map(|b| b.seal(checksum));
        step.completed = sealed;

        self.emit(step, GameEventData::TurnStarted { player: next_id });
    }

    fn game_over(&mut self, winner: Option<PlayerId>, step: &mut StepResult) {
        self.state.phase = TurnPhase::GameOver { winner };
        for player in &mut self.state.players {
            player.is_active_turn = false;
        }

        let checksum = self.state.compute_hash();
        step.completed = self.current.take().map(|b| b.seal(checksum));
        self.emit(step, GameEventData::GameOver { winner });
    }

    fn emit(&self, step: &mut StepResult, data: GameEventData) {
        step.events.push(GameEvent::new(self.state.turn_number, data));
    }
}

// =============================================================================
// TESTS
// =============================================================================
