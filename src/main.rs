//! Boardsync Server
//!
//! Hosts one authoritative board-game session over WebSocket with
//! `--serve`. Without arguments it plays a bot session locally and checks
//! that journal replay and a rejoining replica agree with the authority.

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use boardsync::{
    core::hash::short_hex,
    game::{intent::Intent, state::PlayerId, turn::TurnPhase},
    network::{AuthConfig, GameServer, ServerConfig},
    session::{GameOrchestrator, Push, PushOutcome, ReplicaSession, SessionContext},
    config::EngineConfig,
    game::content::ContentRegistry,
    VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Boardsync Server v{}", VERSION);

    if std::env::args().any(|arg| arg == "--serve") {
        let ctx = SessionContext::new(EngineConfig::from_env(), ContentRegistry::standard(), AuthConfig::from_env());
        let server = GameServer::new(ServerConfig::from_env(), ctx);
        server.run().await.context("session host failed")?;
        return Ok(());
    }

    demo_session()
}

/// Play a bot session twice and compare the results.
fn demo_session() -> Result<()> {
    info!("=== Starting Demo Session ===");

    let session_id = [7u8; 16];
    let players: Vec<PlayerId> = (1..=3).map(|i| PlayerId::new([i; 16])).collect();

    let first = play_bots(session_id, &players)?;
    let second = play_bots(session_id, &players)?;
    if first != second {
        bail!("same seed and intents diverged: {} vs {}", short_hex(&first), short_hex(&second));
    }
    info!(hash = %short_hex(&first), "rerun reached the same final state");
    Ok(())
}

/// Run one bot session; returns the final state hash.
fn play_bots(session_id: [u8; 16], players: &[PlayerId]) -> Result<[u8; 32]> {
    let ctx = SessionContext::standard().with_session_id(session_id);
    let mut orch = GameOrchestrator::new(ctx.clone(), players)?;
    orch.start(Instant::now())?;
    info!(session = %ctx.session_hex(), seed = orch.state().rng_seed, "session started");

    // Drop the third seat after its first turn and bring it back as a replica.
    let leaver = players[2];
    let mut replica: Option<(ReplicaSession, Receiver<Push>)> = None;
    let mut left_at = None;
    let mut acted_turn = 0;

    while !orch.is_game_over() {
        let turn = orch.state().turn_number;
        let active = orch.state().active_player_id().context("no active player")?;

        if left_at.is_none() && turn > 3 && active != leaver {
            orch.player_disconnected(leaver, Instant::now())?;
            left_at = Some(turn);
        }
        if replica.is_none() && left_at.is_some_and(|t| turn > t) {
            let ticket = orch.rejoin_ticket(&leaver).context("no ticket")?;
            let bundle = orch.request_rejoin(leaver, left_at.unwrap_or(0), &ticket, Instant::now())?;
            let pushes = orch.subscribe_pushes();
            let session = ReplicaSession::from_bundle(ctx.clone(), leaver, &bundle, Instant::now())?;
            info!(records = bundle.records.len(), in_flight = bundle.in_flight.len(), "leaver rebuilt from bundle");
            orch.confirm_rejoin(leaver, Instant::now())?;
            replica = Some((session, pushes));
        }

        let phase = orch.state().phase.clone();
        let intent = match phase {
            TurnPhase::AwaitingRoll => Intent::RollDice,
            TurnPhase::Moving { .. } => Intent::Move,
            TurnPhase::FreeAction if acted_turn != turn => {
                acted_turn = turn;
                try_optional(&mut orch, active, Intent::BuyTile);
                let card = orch.state().player(&active).and_then(|p| {
                    p.hand
                        .iter()
                        .find(|c| ctx.content.card(&c.key).is_some_and(|d| d.is_playable()))
                        .map(|c| c.id)
                });
                if let Some(card) = card {
                    try_optional(&mut orch, active, Intent::PlayCard { card });
                }
                continue;
            }
            TurnPhase::FreeAction => Intent::EndTurn,
            other => bail!("unexpected phase {} between intents", other.name()),
        };

        let sequence = next_sequence(&orch, active);
        let reply = orch.submit_intent(active, sequence, intent.clone(), Instant::now());
        if !reply.is_accepted() {
            bail!("{} refused for {}: {:?}", intent.name(), active, reply);
        }
        if let Some((session, pushes)) = replica.as_mut() {
            drain_pushes(session, pushes)?;
        }
    }

    let final_hash = orch.state().compute_hash();
    info!(
        turns = orch.state().turn_number,
        phase = orch.state().phase.name(),
        hash = %short_hex(&final_hash),
        "=== Session Over ==="
    );
    for player in &orch.state().players {
        info!(player = %player.id, gold = player.resources.gold, position = player.position, bankrupt = player.bankrupt, "standing");
    }

    let snapshot = orch.get_snapshot()?;
    if snapshot.state.compute_hash() != final_hash {
        bail!("boundary snapshot does not match the final state");
    }

    if let Some((mut session, mut pushes)) = replica {
        drain_pushes(&mut session, &mut pushes)?;
        let replica_hash = session.committed_state().compute_hash();
        if replica_hash != final_hash {
            bail!("replica hash {} differs from authority", short_hex(&replica_hash));
        }
        info!(sequence = session.last_sequence(), "replica agrees with authority");
    } else {
        warn!("session ended before the leaver rejoined");
    }

    Ok(final_hash)
}

/// Feed queued authority pushes to the replica.
fn drain_pushes(session: &mut ReplicaSession, pushes: &mut Receiver<Push>) -> Result<()> {
    while let Ok(push) = pushes.try_recv() {
        if let PushOutcome::ResyncRequired { reason } = session.apply_push(push, Instant::now()) {
            bail!("replica lost sync: {reason}");
        }
    }
    Ok(())
}

fn next_sequence(orch: &GameOrchestrator, player: PlayerId) -> u64 {
    orch.state().player(&player).map_or(1, |p| p.last_intent_seq + 1)
}

/// Submit an intent the bot does not depend on; refusals are fine.
fn try_optional(orch: &mut GameOrchestrator, player: PlayerId, intent: Intent) {
    if orch.is_game_over() || orch.state().phase != TurnPhase::FreeAction {
        return;
    }
    let sequence = next_sequence(orch, player);
    let reply = orch.submit_intent(player, sequence, intent.clone(), Instant::now());
    debug!(intent = intent.name(), ?reply, "optional intent");
}
