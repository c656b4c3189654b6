//! Game Orchestrator
//!
//! Top-level driver for one authoritative session. Composes the turn engine,
//! journal, session authority and intent queue, and exposes the operations
//! the host calls: submit/withdraw intents, deadlines, disconnect/rejoin,
//! snapshot and record queries, and the event stream.
//!
//! Every mutation goes through [`GameOrchestrator::commit`]. Events produced
//! while a turn is in flight are held back and released right after the
//! record that contains them is appended. Connection events are released
//! immediately.

use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RulesConfig;
use crate::core::hash::short_hex;
use crate::core::rng::derive_session_seed;
use crate::error::{EngineError, RejectReason};
use crate::game::content::ContentRegistry;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::intent::{Intent, IntentQueue, PendingIntent};
use crate::game::state::{ConnectionStatus, GameState, PlayerId};
use crate::game::turn::{StepResult, TurnAction, TurnEngine, TurnPhase};
use crate::journal::{replay_from, replay_in_flight, GameSnapshot, Journal, TurnRecord};
use crate::session::authority::{Role, SessionAuthority, SessionStatus};
use crate::session::context::{Lifecycle, SessionContext};

const EVENT_CAPACITY: usize = 1024;

// =============================================================================
// SESSION MESSAGES
// =============================================================================

/// Authoritative update pushed to replicas, in commit order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Push {
    /// An accepted action of the in-flight turn
    Action { turn: u64, action: TurnAction },
    /// A sealed record
    Record { record: TurnRecord },
}

/// Everything a rejoining player needs to rebuild current state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejoinBundle {
    /// Latest retained checkpoint
    pub snapshot: GameSnapshot,
    /// Records after the checkpoint
    pub records: Vec<TurnRecord>,
    /// Actions already accepted in the current turn
    pub in_flight: Vec<TurnAction>,
}

impl RejoinBundle {
    /// Rebuild the live engine: snapshot, then records, then in-flight actions.
    pub fn restore(
        &self,
        content: Arc<ContentRegistry>,
        rules: &RulesConfig,
    ) -> Result<TurnEngine, EngineError> {
        let mut engine = replay_from(&self.snapshot, &self.records, content, rules)?;
        replay_in_flight(&mut engine, &self.in_flight)?;
        Ok(engine)
    }

    /// Sequence of the last record the bundle covers.
    pub fn last_sequence(&self) -> u64 {
        self.records.last().map_or(self.snapshot.sequence, |r| r.sequence)
    }
}

/// Answer to a submitted intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IntentReply {
    /// Applied during `turn`
    Accepted { turn: u64 },
    /// Refused; nothing recorded
    Rejected { reason: RejectReason },
    /// Recorded, but resolution failed
    Failed { error: EngineError },
    /// Withdrawn by the sender before it was dequeued
    Withdrawn,
}

impl IntentReply {
    fn from_result(turn: u64, result: Result<StepResult, EngineError>) -> Self {
        match result {
            Ok(StepResult { failure: Some(error), .. }) => IntentReply::Failed { error },
            Ok(_) => IntentReply::Accepted { turn },
            Err(error) => IntentReply::from_error(error),
        }
    }

    pub fn from_error(error: EngineError) -> Self {
        match error {
            EngineError::Validation(reason) => IntentReply::Rejected { reason },
            error => IntentReply::Failed { error },
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, IntentReply::Accepted { .. })
    }
}

/// Read-only status published to queries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub turn: u64,
    pub phase: TurnPhase,
    pub active_player: Option<PlayerId>,
    pub last_sequence: u64,
    pub state_hash: String,
    pub pending_intents: usize,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Authoritative session driver.
pub struct GameOrchestrator {
    ctx: SessionContext,
    engine: TurnEngine,
    authority: SessionAuthority,
    journal: Option<Journal>,
    boundary: Option<GameSnapshot>,
    queue: IntentQueue,
    held_events: Vec<GameEvent>,
    events: broadcast::Sender<GameEvent>,
    pushes: broadcast::Sender<Push>,
    phase_key: (u64, &'static str),
    phase_started: Instant,
}

impl GameOrchestrator {
    /// Seat `players` in the given order. The RNG seed is derived from the
    /// session id, the sorted player ids and the content fingerprint.
    pub fn new(ctx: SessionContext, players: &[PlayerId]) -> Result<Self, EngineError> {
        let rules = &ctx.config.rules;
        if players.len() < rules.min_players || players.len() > rules.max_players {
            return Err(RejectReason::InvalidPayload(format!(
                "{} players; need {}..={}",
                players.len(),
                rules.min_players,
                rules.max_players
            ))
            .into());
        }

        let mut sorted: Vec<[u8; 16]> = players.iter().map(|p| p.0).collect();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != players.len() {
            return Err(RejectReason::InvalidPayload("duplicate player".into()).into());
        }

        let seed = derive_session_seed(&ctx.session_id, &sorted, &ctx.content.fingerprint());
        let state = GameState::new(players, seed, &ctx.content, rules.starting_resources);
        let engine = TurnEngine::new(state, ctx.content.clone(), rules.clone());
        let authority = SessionAuthority::new(Role::Authoritative, &ctx);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (pushes, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            ctx,
            engine,
            authority,
            journal: None,
            boundary: None,
            queue: IntentQueue::new(),
            held_events: Vec::new(),
            events,
            pushes,
            phase_key: (0, TurnPhase::AwaitingRoll.name()),
            phase_started: Instant::now(),
        })
    }

    /// Activate the authority, begin turn 1 and take the first checkpoint.
    pub fn start(&mut self, now: Instant) -> Result<(), EngineError> {
        self.authority.start(&self.ctx)?;
        let step = self.engine.start()?;

        let snapshot = GameSnapshot::capture(
            self.ctx.session_id,
            0,
            self.engine.state(),
            self.ctx.content.fingerprint(),
        );
        self.journal = Some(Journal::new(self.ctx.config.journal.clone(), &snapshot)?);
        self.boundary = Some(snapshot);
        self.touch_phase(now);

        info!(
            session = %self.ctx.session_hex(),
            players = self.engine.state().players.len(),
            seed = self.engine.state().rng_seed,
            "session started"
        );
        for event in step.events {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    /// Terminate the session. Pending intents are dropped.
    pub fn stop(&mut self) {
        self.authority.stop(&self.ctx);
        let dropped = self.queue.len();
        while self.queue.pop().is_some() {}
        info!(session = %self.ctx.session_hex(), dropped, "session stopped");
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Apply one action as the authority: push it, journal any sealed record
    /// and release the events that record covers.
    pub fn commit(&mut self, action: TurnAction, now: Instant) -> Result<StepResult, EngineError> {
        self.authority.ensure_writable()?;

        let turn = self.engine.state().turn_number;
        let step = self.engine.apply(action.clone())?;
        let _ = self.pushes.send(Push::Action { turn, action });

        for event in &step.events {
            if let GameEventData::TurnAutoPassed { player, phase } = &event.data {
                info!(player = %player, phase = phase.name(), turn, "turn auto-passed");
            }
        }
        self.held_events.extend(step.events.iter().cloned());

        match &step.failure {
            Some(err @ EngineError::EffectLoopDetected { .. }) => {
                warn!(turn, error = %err, "effect loop rolled back");
            }
            Some(err) => debug!(turn, error = %err, "action failed after recording"),
            None => {}
        }

        if let Some(record) = &step.completed {
            if let Err(err) = self.seal(record.clone()) {
                self.fail(&err);
                return Err(err);
            }
        }

        self.touch_phase(now);
        Ok(step)
    }

    fn seal(&mut self, record: TurnRecord) -> Result<(), EngineError> {
        let journal = self.journal.as_mut().ok_or(EngineError::SessionNotActive)?;
        journal.append_record(record.clone())?;

        let snapshot = GameSnapshot::capture(
            self.ctx.session_id,
            record.sequence,
            self.engine.state(),
            self.ctx.content.fingerprint(),
        );
        if journal.is_checkpoint_due() {
            journal.checkpoint(&snapshot)?;
            debug!(sequence = record.sequence, "checkpoint stored");
        }
        self.boundary = Some(snapshot);

        info!(
            turn = record.sequence,
            player = %record.acting_player,
            actions = record.actions.len(),
            outcomes = record.outcomes.len(),
            checksum = %record.checksum_hex(),
            "turn complete"
        );
        if let TurnPhase::GameOver { winner } = self.engine.phase() {
            info!(winner = ?winner.map(|w| w.to_string()), "game over");
        }

        let _ = self.pushes.send(Push::Record { record });
        for event in self.held_events.drain(..) {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn fail(&mut self, err: &EngineError) {
        if err.is_fatal() {
            error!(session = %self.ctx.session_hex(), error = %err, "session terminated");
            self.authority.terminate(&err.to_string());
        }
    }

    fn touch_phase(&mut self, now: Instant) {
        let key = (self.engine.state().turn_number, self.engine.phase().name());
        if key != self.phase_key {
            self.phase_key = key;
            self.phase_started = now;
        }
    }

    fn emit_now(&self, data: GameEventData) {
        let event = GameEvent::new(self.engine.state().turn_number, data);
        let _ = self.events.send(event);
    }

    // =========================================================================
    // INTENTS
    // =========================================================================

    /// Queue an intent. Sequence numbers at or below the sender's last
    /// accepted one are rejected here, before queueing.
    pub fn enqueue_intent(
        &mut self,
        player: PlayerId,
        sequence: u64,
        intent: Intent,
    ) -> Result<(), EngineError> {
        self.authority.ensure_writable()?;
        if self.engine.is_game_over() {
            return Err(RejectReason::GameOver.into());
        }
        let sender = self.engine.state().player(&player).ok_or(RejectReason::UnknownPlayer)?;
        if sequence <= sender.last_intent_seq {
            return Err(RejectReason::DuplicateIntent {
                sequence,
                last_accepted: sender.last_intent_seq,
            }
            .into());
        }
        self.queue.push(PendingIntent { player, sequence, intent })?;
        Ok(())
    }

    /// Pull a pending intent back out. False once it has been dequeued.
    pub fn withdraw_intent(&mut self, player: &PlayerId, sequence: u64) -> bool {
        self.queue.withdraw(player, sequence)
    }

    /// Dequeue and run one intent to completion or failure.
    pub fn process_next(&mut self, now: Instant) -> Option<(PendingIntent, IntentReply)> {
        let pending = self.queue.pop()?;
        let turn = self.engine.state().turn_number;
        let action = TurnAction::Intent {
            player: pending.player,
            sequence: pending.sequence,
            intent: pending.intent.clone(),
        };

        let result = self.commit(action, now);
        if let Err(err) = &result {
            debug!(
                player = %pending.player,
                sequence = pending.sequence,
                intent = pending.intent.name(),
                reason = %err,
                "intent rejected"
            );
        }
        Some((pending, IntentReply::from_result(turn, result)))
    }

    /// Queue an intent and drain the queue; returns this intent's reply.
    pub fn submit_intent(
        &mut self,
        player: PlayerId,
        sequence: u64,
        intent: Intent,
        now: Instant,
    ) -> IntentReply {
        if let Err(err) = self.enqueue_intent(player, sequence, intent) {
            return IntentReply::from_error(err);
        }
        let mut mine = IntentReply::Withdrawn;
        while let Some((pending, reply)) = self.process_next(now) {
            if pending.player == player && pending.sequence == sequence {
                mine = reply;
            }
        }
        mine
    }

    pub fn pending_intents(&self) -> usize {
        self.queue.len()
    }

    // =========================================================================
    // DEADLINES
    // =========================================================================

    /// When the current phase's default action fires. A disconnected active
    /// player gets the shorter disconnected timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.authority.status() != &SessionStatus::Active || self.engine.is_game_over() {
            return None;
        }
        let timing = &self.ctx.config.timing;
        let active = self.engine.state().active_player()?;

        let regular = match self.engine.phase() {
            TurnPhase::AwaitingRoll => timing.roll_deadline,
            TurnPhase::Moving { .. } => timing.move_deadline,
            TurnPhase::FreeAction => timing.free_action_deadline,
            _ => None,
        }
        .map(|d| self.phase_started + d);

        let absent = (!active.is_connected()).then(|| {
            let since = self
                .authority
                .disconnected_since(&active.id)
                .map_or(self.phase_started, |s| s.max(self.phase_started));
            since + timing.disconnected_timeout
        });

        match (regular, absent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire the default action if the deadline has passed.
    pub fn poll_deadline(&mut self, now: Instant) -> Result<Option<StepResult>, EngineError> {
        match self.next_deadline() {
            Some(deadline) if deadline <= now => {}
            _ => return Ok(None),
        }
        let player = match self.engine.state().active_player_id() {
            Some(p) => p,
            None => return Ok(None),
        };
        let phase = self.engine.phase().clone();
        debug!(player = %player, phase = phase.name(), "deadline elapsed");
        self.commit(TurnAction::DeadlineElapsed { player, phase }, now).map(Some)
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Record a dropped connection.
    pub fn player_disconnected(&mut self, player: PlayerId, now: Instant) -> Result<(), EngineError> {
        self.authority.ensure_writable()?;
        let status = self
            .engine
            .state()
            .player(&player)
            .ok_or(RejectReason::UnknownPlayer)?
            .connection;
        if status == ConnectionStatus::Disconnected {
            return Ok(());
        }

        self.authority.mark_disconnected(player, now);
        if !self.engine.is_game_over() {
            self.commit(
                TurnAction::ConnectionChanged { player, status: ConnectionStatus::Disconnected },
                now,
            )?;
        }
        info!(player = %player, turn = self.engine.state().turn_number, "player disconnected");
        self.emit_now(GameEventData::PlayerDisconnected { player });
        Ok(())
    }

    /// Authenticate a rejoin and return the catch-up bundle.
    ///
    /// A disconnected player moves to `Reconnecting`;
    /// [`GameOrchestrator::confirm_rejoin`] completes the transition once the
    /// client has applied the bundle. A player the host still sees as
    /// connected (a new socket before the old one timed out) keeps its status.
    pub fn request_rejoin(
        &mut self,
        player: PlayerId,
        last_known_turn: u64,
        credential: &str,
        now: Instant,
    ) -> Result<RejoinBundle, EngineError> {
        self.authority.ensure_writable()?;
        let status = self
            .engine
            .state()
            .player(&player)
            .ok_or(RejectReason::UnknownPlayer)?
            .connection;

        if let Err(reason) = self.authority.authenticate(&player, credential, &self.ctx.auth) {
            warn!(player = %player, reason = %reason, "rejoin refused");
            return Err(reason.into());
        }
        self.authority.check_reconnect_window(&player, now)?;

        let current = self.engine.state().turn_number;
        if last_known_turn > current {
            return Err(RejectReason::InvalidPayload(format!(
                "last known turn {last_known_turn} is ahead of {current}"
            ))
            .into());
        }

        if status == ConnectionStatus::Disconnected && !self.engine.is_game_over() {
            self.commit(
                TurnAction::ConnectionChanged { player, status: ConnectionStatus::Reconnecting },
                now,
            )?;
        }

        let bundle = self.rejoin_bundle()?;
        info!(
            player = %player,
            behind = current - last_known_turn,
            snapshot = bundle.snapshot.sequence,
            records = bundle.records.len(),
            in_flight = bundle.in_flight.len(),
            "rejoin bundle issued"
        );
        Ok(bundle)
    }

    /// Finish a rejoin: `Reconnecting → Connected`.
    pub fn confirm_rejoin(&mut self, player: PlayerId, now: Instant) -> Result<(), EngineError> {
        self.authority.ensure_writable()?;
        let status = self
            .engine
            .state()
            .player(&player)
            .ok_or(RejectReason::UnknownPlayer)?
            .connection;

        if status == ConnectionStatus::Connected {
            return Ok(());
        }
        if !self.engine.is_game_over() {
            if status != ConnectionStatus::Reconnecting {
                return Err(RejectReason::InvalidPayload("no rejoin in progress".into()).into());
            }
            self.commit(
                TurnAction::ConnectionChanged { player, status: ConnectionStatus::Connected },
                now,
            )?;
        }
        self.authority.mark_connected(&player);
        info!(player = %player, turn = self.engine.state().turn_number, "player reconnected");
        self.emit_now(GameEventData::PlayerReconnected { player });
        Ok(())
    }

    /// Full state resend for a seated player, without touching its
    /// connection. Used for the initial join and after a replica desyncs.
    pub fn request_resync(&self, player: PlayerId, last_sequence: u64) -> Result<RejoinBundle, EngineError> {
        self.engine.state().player(&player).ok_or(RejectReason::UnknownPlayer)?;
        let bundle = self.rejoin_bundle()?;
        info!(
            player = %player,
            from = last_sequence,
            snapshot = bundle.snapshot.sequence,
            records = bundle.records.len(),
            "resync bundle issued"
        );
        Ok(bundle)
    }

    fn rejoin_bundle(&self) -> Result<RejoinBundle, EngineError> {
        let journal = self.journal.as_ref().ok_or(EngineError::SessionNotActive)?;
        let snapshot = journal.latest_checkpoint()?;
        let records = journal.records_after(snapshot.sequence)?;
        Ok(RejoinBundle {
            snapshot,
            records,
            in_flight: self.engine.in_flight_actions().to_vec(),
        })
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// State as of the last sealed record.
    pub fn get_snapshot(&self) -> Result<GameSnapshot, EngineError> {
        self.boundary.clone().ok_or(EngineError::SessionNotActive)
    }

    pub fn get_turn_record(&self, turn: u64) -> Result<TurnRecord, EngineError> {
        self.journal
            .as_ref()
            .and_then(|j| j.get(turn))
            .cloned()
            .ok_or(EngineError::TurnNotFound(turn))
    }

    /// Rejoin ticket for a seated player.
    pub fn rejoin_ticket(&self, player: &PlayerId) -> Option<String> {
        self.engine
            .state()
            .player(player)
            .map(|_| self.authority.issue_rejoin_ticket(player))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_pushes(&self) -> broadcast::Receiver<Push> {
        self.pushes.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<GameEvent> {
        self.events.clone()
    }

    pub(crate) fn push_sender(&self) -> broadcast::Sender<Push> {
        self.pushes.clone()
    }

    pub fn view(&self) -> SessionView {
        let state = self.engine.state();
        SessionView {
            status: self.authority.status().clone(),
            turn: state.turn_number,
            phase: state.phase.clone(),
            active_player: state.active_player_id(),
            last_sequence: self.journal.as_ref().map_or(0, |j| j.last_sequence()),
            state_hash: short_hex(&state.compute_hash()),
            pending_intents: self.queue.len(),
        }
    }

    pub fn state(&self) -> &GameState {
        self.engine.state()
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn status(&self) -> &SessionStatus {
        self.authority.status()
    }

    pub fn is_game_over(&self) -> bool {
        self.engine.is_game_over()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use crate::config::EngineConfig;
    use crate::network::auth::AuthConfig;

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn orchestrator(config: EngineConfig) -> GameOrchestrator {
        let ctx = SessionContext::new(config, ContentRegistry::standard(), AuthConfig::default())
            .with_session_id([9; 16]);
        let mut orch = GameOrchestrator::new(ctx, &[pid(1), pid(2), pid(3)]).unwrap();
        orch.start(Instant::now()).unwrap();
        orch
    }

    fn next_seq(orch: &GameOrchestrator, player: PlayerId) -> u64 {
        orch.state().player(&player).unwrap().last_intent_seq + 1
    }

    /// Roll, move, end for the active player.
    fn play_turn(orch: &mut GameOrchestrator) {
        let player = orch.state().active_player_id().unwrap();
        let now = Instant::now();
        for intent in [Intent::RollDice, Intent::Move, Intent::EndTurn] {
            if orch.is_game_over() || orch.state().active_player_id() != Some(player) {
                return;
            }
            let seq = next_seq(orch, player);
            let reply = orch.submit_intent(player, seq, intent, now);
            assert!(reply.is_accepted(), "{reply:?}");
        }
    }

    #[test]
    fn test_rejects_bad_rosters() {
        let ctx = SessionContext::standard();
        assert!(GameOrchestrator::new(ctx.clone(), &[pid(1)]).is_err());
        assert!(GameOrchestrator::new(ctx, &[pid(1), pid(1)]).is_err());
    }

    #[test]
    fn test_seed_ignores_seat_order() {
        let ctx = SessionContext::standard();
        let a = GameOrchestrator::new(ctx.clone(), &[pid(1), pid(2)]).unwrap();
        let b = GameOrchestrator::new(ctx, &[pid(2), pid(1)]).unwrap();
        assert_eq!(a.state().rng_seed, b.state().rng_seed);
    }

    #[test]
    fn test_events_held_until_record() {
        let mut orch = orchestrator(EngineConfig::default());
        let mut events = orch.subscribe();
        let player = orch.state().active_player_id().unwrap();

        let reply = orch.submit_intent(player, 1, Intent::RollDice, Instant::now());
        assert_eq!(reply, IntentReply::Accepted { turn: 1 });
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);

        orch.submit_intent(player, 2, Intent::Move, Instant::now());
        orch.submit_intent(player, 3, Intent::EndTurn, Instant::now());

        let first = events.try_recv().unwrap();
        assert!(matches!(first.data, GameEventData::DiceRolled { .. }));
        assert!(orch.get_turn_record(1).is_ok());
    }

    #[test]
    fn test_pushes_in_commit_order() {
        let mut orch = orchestrator(EngineConfig::default());
        let mut pushes = orch.subscribe_pushes();
        play_turn(&mut orch);

        let mut kinds = Vec::new();
        while let Ok(push) = pushes.try_recv() {
            kinds.push(match push {
                Push::Action { turn, .. } => format!("action:{turn}"),
                Push::Record { record } => format!("record:{}", record.sequence),
            });
        }
        assert_eq!(kinds, vec!["action:1", "action:1", "action:1", "record:1"]);
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut orch = orchestrator(EngineConfig::default());
        let player = orch.state().active_player_id().unwrap();
        orch.submit_intent(player, 5, Intent::RollDice, Instant::now());

        let reply = orch.submit_intent(player, 5, Intent::Move, Instant::now());
        assert!(matches!(
            reply,
            IntentReply::Rejected { reason: RejectReason::DuplicateIntent { sequence: 5, last_accepted: 5 } }
        ));
        let reply = orch.submit_intent(pid(42), 1, Intent::RollDice, Instant::now());
        assert_eq!(reply, IntentReply::Rejected { reason: RejectReason::UnknownPlayer });
    }

    #[test]
    fn test_not_your_turn() {
        let mut orch = orchestrator(EngineConfig::default());
        let reply = orch.submit_intent(pid(2), 1, Intent::RollDice, Instant::now());
        assert_eq!(reply, IntentReply::Rejected { reason: RejectReason::NotYourTurn });
    }

    #[test]
    fn test_withdraw_before_dequeue() {
        let mut orch = orchestrator(EngineConfig::default());
        let player = orch.state().active_player_id().unwrap();
        orch.enqueue_intent(player, 1, Intent::RollDice).unwrap();
        assert_eq!(orch.pending_intents(), 1);

        assert!(orch.withdraw_intent(&player, 1));
        assert!(!orch.withdraw_intent(&player, 1));
        assert!(orch.process_next(Instant::now()).is_none());
    }

    #[test]
    fn test_roll_deadline_auto_passes() {
        let mut orch = orchestrator(EngineConfig::default());
        let t0 = Instant::now();
        let first = orch.state().active_player_id().unwrap();
        let deadline = orch.next_deadline().unwrap();

        assert!(orch.poll_deadline(t0).unwrap().is_none());
        let step = orch.poll_deadline(deadline).unwrap().unwrap();
        assert!(step.completed.is_some());
        assert_ne!(orch.state().active_player_id(), Some(first));

        let record = orch.get_turn_record(1).unwrap();
        assert!(matches!(record.actions[0], TurnAction::DeadlineElapsed { .. }));
    }

    #[test]
    fn test_disconnected_active_player_gets_short_deadline() {
        let mut orch = orchestrator(EngineConfig::default());
        let t0 = Instant::now();
        let active = orch.state().active_player_id().unwrap();
        let before = orch.next_deadline().unwrap();

        orch.player_disconnected(active, t0).unwrap();
        let after = orch.next_deadline().unwrap();
        assert!(after < before);
        assert!(after <= t0 + orch.context().config.timing.disconnected_timeout);
    }

    #[test]
    fn test_no_deadline_when_disabled() {
        let mut config = EngineConfig::default();
        config.timing.roll_deadline = None;
        let orch = orchestrator(config);
        assert!(orch.next_deadline().is_none());
    }

    #[test]
    fn test_rejoin_bundle_restores_live_state() {
        let mut orch = orchestrator(EngineConfig::default());
        let t0 = Instant::now();
        orch.player_disconnected(pid(2), t0).unwrap();
        for _ in 0..4 {
            play_turn(&mut orch);
        }
        // Leave the current turn mid-flight.
        let active = orch.state().active_player_id().unwrap();
        let seq = next_seq(&orch, active);
        orch.submit_intent(active, seq, Intent::RollDice, t0);

        let ticket = orch.rejoin_ticket(&pid(2)).unwrap();
        let bundle = orch.request_rejoin(pid(2), 1, &ticket, t0 + Duration::from_secs(1)).unwrap();
        assert!(!bundle.in_flight.is_empty());

        let restored = bundle
            .restore(orch.context().content.clone(), &orch.context().config.rules)
            .unwrap();
        assert_eq!(restored.state().compute_hash(), orch.state().compute_hash());

        orch.confirm_rejoin(pid(2), t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(orch.state().player(&pid(2)).unwrap().connection, ConnectionStatus::Connected);
    }

    #[test]
    fn test_resync_leaves_connected_player_alone() {
        let mut orch = orchestrator(EngineConfig::default());
        let active = orch.state().active_player_id().unwrap();
        let deadline = orch.next_deadline();
        let hash = orch.state().compute_hash();

        let bundle = orch.request_resync(active, 0).unwrap();
        assert_eq!(bundle.last_sequence(), 0);
        assert_eq!(orch.state().player(&active).unwrap().connection, ConnectionStatus::Connected);
        assert_eq!(orch.next_deadline(), deadline);
        assert_eq!(orch.state().compute_hash(), hash);
        assert!(orch.engine().in_flight_actions().is_empty());

        assert_eq!(
            orch.request_resync(pid(42), 0).unwrap_err(),
            EngineError::Validation(RejectReason::UnknownPlayer)
        );
    }

    #[test]
    fn test_rejoin_while_still_connected_keeps_status() {
        let mut orch = orchestrator(EngineConfig::default());
        let active = orch.state().active_player_id().unwrap();
        let deadline = orch.next_deadline();

        let ticket = orch.rejoin_ticket(&active).unwrap();
        orch.request_rejoin(active, 1, &ticket, Instant::now()).unwrap();
        assert_eq!(orch.state().player(&active).unwrap().connection, ConnectionStatus::Connected);
        assert_eq!(orch.next_deadline(), deadline);
        assert!(!orch
            .engine()
            .in_flight_actions()
            .iter()
            .any(|a| matches!(a, TurnAction::ConnectionChanged { .. })));

        orch.confirm_rejoin(active, Instant::now()).unwrap();
        assert!(orch.engine().in_flight_actions().is_empty());
    }

    #[test]
    fn test_rejoin_requires_ticket() {
        let mut orch = orchestrator(EngineConfig::default());
        let err = orch.request_rejoin(pid(2), 0, "forged", Instant::now()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(RejectReason::Unauthenticated(_))));
    }

    #[test]
    fn test_rejoin_window_expires() {
        let mut orch = orchestrator(EngineConfig::default());
        let t0 = Instant::now();
        orch.player_disconnected(pid(3), t0).unwrap();

        let late = t0 + orch.context().config.timing.reconnect_window + Duration::from_secs(1);
        let ticket = orch.rejoin_ticket(&pid(3)).unwrap();
        let err = orch.request_rejoin(pid(3), 0, &ticket, late).unwrap_err();
        assert_eq!(err, EngineError::Validation(RejectReason::ReconnectWindowExpired));
    }

    #[test]
    fn test_snapshot_tracks_last_record() {
        let mut orch = orchestrator(EngineConfig::default());
        assert_eq!(orch.get_snapshot().unwrap().sequence, 0);
        play_turn(&mut orch);
        play_turn(&mut orch);

        let snapshot = orch.get_snapshot().unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.checksum, orch.get_turn_record(2).unwrap().checksum);
        assert_eq!(orch.get_turn_record(3).unwrap_err(), EngineError::TurnNotFound(3));
    }

    #[test]
    fn test_stopped_session_refuses_intents() {
        let mut orch = orchestrator(EngineConfig::default());
        orch.stop();
        let player = orch.state().active_player_id().unwrap();
        let reply = orch.submit_intent(player, 1, Intent::RollDice, Instant::now());
        assert_eq!(reply, IntentReply::Failed { error: EngineError::SessionNotActive });
        assert!(orch.next_deadline().is_none());
    }
}
