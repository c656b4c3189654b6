//! Replica Session
//!
//! A participant's local copy of the game. It never mutates on its own:
//! authoritative pushes are applied through the same engine code, every
//! record's checksum is verified, and intents are forwarded upstream.
//!
//! Two engines are kept. `committed` sits on the last verified record
//! boundary; `live` is `committed` plus the in-flight actions of the current
//! turn. When a record arrives, `committed` replays it and `live` restarts
//! from the new boundary.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::game::intent::Intent;
use crate::game::state::{GameState, PlayerId};
use crate::game::turn::{StepResult, TurnAction, TurnEngine};
use crate::journal::{replay_from, replay_in_flight, replay_record};
use crate::network::protocol::ClientMessage;
use crate::session::authority::{Role, SessionAuthority, SessionStatus};
use crate::session::context::{Lifecycle, SessionContext};
use crate::session::orchestrator::{Push, RejoinBundle};

/// What applying one push did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Applied to the live engine
    Applied,
    /// Record verified and committed
    Committed { sequence: u64 },
    /// Already covered; ignored
    Stale,
    /// Gap or divergence; a fresh bundle is needed
    ResyncRequired { reason: String },
}

/// Local replica of an authoritative session.
pub struct ReplicaSession {
    ctx: SessionContext,
    player: PlayerId,
    authority: SessionAuthority,
    committed: TurnEngine,
    live: TurnEngine,
    last_sequence: u64,
    next_intent_seq: u64,
    last_heartbeat: Instant,
    resync_pending: bool,
}

impl ReplicaSession {
    /// Build a replica from a join or rejoin bundle.
    pub fn from_bundle(
        ctx: SessionContext,
        player: PlayerId,
        bundle: &RejoinBundle,
        now: Instant,
    ) -> Result<Self, EngineError> {
        let (committed, live) = rebuild(&ctx, bundle)?;
        let mut authority = SessionAuthority::new(Role::Replica, &ctx);
        authority.start(&ctx)?;
        let next_intent_seq = live.state().player(&player).map_or(0, |p| p.last_intent_seq) + 1;

        Ok(Self {
            ctx,
            player,
            authority,
            committed,
            live,
            last_sequence: bundle.last_sequence(),
            next_intent_seq,
            last_heartbeat: now,
            resync_pending: false,
        })
    }

    /// Replace local state with a fresh bundle (snapshot resend).
    pub fn restore(&mut self, bundle: &RejoinBundle, now: Instant) -> Result<(), EngineError> {
        let (committed, live) = rebuild(&self.ctx, bundle)?;
        self.committed = committed;
        self.live = live;
        self.last_sequence = bundle.last_sequence();
        let accepted = self.live.state().player(&self.player).map_or(0, |p| p.last_intent_seq);
        self.next_intent_seq = self.next_intent_seq.max(accepted + 1);
        self.resync_pending = false;
        self.heartbeat(now);
        debug!(player = %self.player, sequence = self.last_sequence, "replica restored");
        Ok(())
    }

    // =========================================================================
    // AUTHORITATIVE PUSHES
    // =========================================================================

    /// Apply one push from the authority.
    pub fn apply_push(&mut self, push: Push, now: Instant) -> PushOutcome {
        self.heartbeat(now);
        if self.resync_pending {
            return PushOutcome::Stale;
        }
        match push {
            Push::Action { turn, action } => self.apply_action(turn, action),
            Push::Record { record } => {
                if record.sequence <= self.last_sequence {
                    return PushOutcome::Stale;
                }
                if record.sequence != self.last_sequence + 1 {
                    return self.resync(format!(
                        "record gap: have {}, got {}",
                        self.last_sequence, record.sequence
                    ));
                }
                if let Err(err) = replay_record(&mut self.committed, &record) {
                    return self.resync(err.to_string());
                }
                self.last_sequence = record.sequence;
                self.live = TurnEngine::new(
                    self.committed.state().clone(),
                    self.ctx.content.clone(),
                    self.ctx.config.rules.clone(),
                );
                PushOutcome::Committed { sequence: record.sequence }
            }
        }
    }

    fn apply_action(&mut self, turn: u64, action: TurnAction) -> PushOutcome {
        let live_turn = self.live.state().turn_number;
        if turn < live_turn {
            return PushOutcome::Stale;
        }
        if turn != live_turn {
            return self.resync(format!("action for turn {turn} while at {live_turn}"));
        }
        match self.live.apply(action) {
            Ok(_) => PushOutcome::Applied,
            Err(err) => self.resync(format!("authoritative action refused locally: {err}")),
        }
    }

    fn resync(&mut self, reason: String) -> PushOutcome {
        warn!(player = %self.player, sequence = self.last_sequence, reason = %reason, "replica out of sync");
        self.resync_pending = true;
        PushOutcome::ResyncRequired { reason }
    }

    // =========================================================================
    // LOCAL SIDE
    // =========================================================================

    /// Pre-check an intent against local state and build the upstream
    /// message. The authority has the final word.
    pub fn submit_intent(&mut self, intent: Intent) -> Result<ClientMessage, EngineError> {
        let sequence = self.next_intent_seq;
        self.live.validate(&TurnAction::Intent { player: self.player, sequence, intent: intent.clone() })?;
        self.next_intent_seq += 1;
        Ok(ClientMessage::SubmitIntent { sequence, intent })
    }

    /// Replicas never mutate on their own.
    pub fn apply_local(&mut self, action: TurnAction) -> Result<StepResult, EngineError> {
        self.authority.ensure_writable()?;
        self.live.apply(action)
    }

    /// Message asking the authority for a fresh bundle.
    pub fn resync_request(&self) -> ClientMessage {
        ClientMessage::Resync { last_sequence: self.last_sequence }
    }

    // =========================================================================
    // AUTHORITY LIVENESS
    // =========================================================================

    /// Any message from the authority counts as a heartbeat.
    pub fn heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
        self.authority.authority_restored();
    }

    /// Suspend after two missed heartbeats; `AuthorityLost` once the grace
    /// period runs out.
    pub fn poll(&mut self, now: Instant) -> Result<&SessionStatus, EngineError> {
        let silence = now.saturating_duration_since(self.last_heartbeat);
        if silence > self.ctx.config.timing.heartbeat_interval * 2 {
            if self.authority.status() == &SessionStatus::Active {
                warn!(player = %self.player, silent_ms = silence.as_millis() as u64, "authority unreachable");
            }
            self.authority.authority_unreachable(now);
        }
        self.authority.poll(now)?;
        Ok(self.authority.status())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Current state including the in-flight turn.
    pub fn state(&self) -> &GameState {
        self.live.state()
    }

    /// State at the last verified record.
    pub fn committed_state(&self) -> &GameState {
        self.committed.state()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn status(&self) -> &SessionStatus {
        self.authority.status()
    }

    pub fn needs_resync(&self) -> bool {
        self.resync_pending
    }
}

impl Lifecycle for ReplicaSession {
    fn start(&mut self, ctx: &SessionContext) -> Result<(), EngineError> {
        self.authority.start(ctx)
    }

    fn stop(&mut self, ctx: &SessionContext) {
        self.authority.stop(ctx);
    }
}

/// Boundary engine and live engine for a bundle.
fn rebuild(ctx: &SessionContext, bundle: &RejoinBundle) -> Result<(TurnEngine, TurnEngine), EngineError> {
    let rules = &ctx.config.rules;
    let committed = replay_from(&bundle.snapshot, &bundle.records, ctx.content.clone(), rules)?;
    let mut live = TurnEngine::new(committed.state().clone(), ctx.content.clone(), rules.clone());
    replay_in_flight(&mut live, &bundle.in_flight)?;
    Ok((committed, live))
}

// =============================================================================
// TESTS
// =============================================================================
