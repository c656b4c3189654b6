//! End-to-end turn scenarios driven through the authoritative orchestrator.

use std::time::Duration;

use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

use boardsync::config::EngineConfig;
use boardsync::error::{EngineError, RejectReason};
use boardsync::game::content::{
    standard_tables, CardAction, CardKey, ContentRegistry, ContentTables, EventCardData,
};
use boardsync::game::effects::{StateChange, TradeTerms};
use boardsync::game::events::{GameEvent, GameEventData};
use boardsync::game::intent::Intent;
use boardsync::game::state::{ConnectionStatus, PlayerId, Resource, Resources, TileKind};
use boardsync::game::turn::{TurnAction, TurnPhase};
use boardsync::network::AuthConfig;
use boardsync::session::{GameOrchestrator, IntentReply, ReplicaSession, SessionContext};

fn pid(n: u8) -> PlayerId {
    PlayerId::new([n; 16])
}

fn context(content: ContentRegistry, session: u8) -> SessionContext {
    SessionContext::new(EngineConfig::default(), content, AuthConfig::default())
        .with_session_id([session; 16])
}

fn started(ctx: SessionContext, players: &[PlayerId]) -> GameOrchestrator {
    let mut orch = GameOrchestrator::new(ctx, players).unwrap();
    orch.start(Instant::now()).unwrap();
    orch
}

fn next_seq(orch: &GameOrchestrator, player: PlayerId) -> u64 {
    orch.state().player(&player).unwrap().last_intent_seq + 1
}

fn submit(orch: &mut GameOrchestrator, player: PlayerId, intent: Intent) -> IntentReply {
    let seq = next_seq(orch, player);
    orch.submit_intent(player, seq, intent, Instant::now())
}

/// Play the current turn to its end. Absent players are auto-passed.
fn finish_turn(orch: &mut GameOrchestrator) {
    let turn = orch.state().turn_number;
    while !orch.is_game_over() && orch.state().turn_number == turn {
        let active = orch.state().active_player_id().unwrap();
        if !orch.state().player(&active).unwrap().is_connected() {
            let deadline = orch.next_deadline().unwrap();
            orch.poll_deadline(deadline).unwrap();
            continue;
        }
        let intent = match orch.state().phase {
            TurnPhase::AwaitingRoll => Intent::RollDice,
            TurnPhase::Moving { .. } => Intent::Move,
            TurnPhase::FreeAction => Intent::EndTurn,
            ref other => panic!("unexpected phase {other:?}"),
        };
        let reply = submit(orch, active, intent);
        assert!(reply.is_accepted(), "{reply:?}");
    }
}

fn drain(events: &mut Receiver<GameEvent>) -> Vec<GameEventData> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event.data);
    }
    out
}

/// Start tile followed by eleven copies of `tile`.
fn board_of(tile: TileKind) -> Vec<TileKind> {
    std::iter::once(TileKind::Start).chain(std::iter::repeat(tile).take(11)).collect()
}

#[test]
fn test_roll_four_lands_on_card_tile() {
    let mut tables: ContentTables = standard_tables();
    tables.board.tiles = board_of(TileKind::CardDraw);
    tables.card_deck = vec!["windfall".into()];
    let content = ContentRegistry::from_tables(tables).unwrap();

    // Find a session whose first roll is a four.
    let mut orch = (0..=u8::MAX)
        .map(|session| {
            let mut orch = started(context(content.clone(), session), &[pid(1), pid(2)]);
            submit(&mut orch, pid(1), Intent::RollDice);
            orch
        })
        .find(|orch| orch.state().phase == TurnPhase::Moving { roll: 4 })
        .expect("some seed rolls a four");

    let mut events = orch.subscribe();
    assert!(submit(&mut orch, pid(1), Intent::Move).is_accepted());
    let mover = orch.state().player(&pid(1)).unwrap();
    assert_eq!(mover.position, 4);
    assert_eq!(mover.hand.len(), 1);
    assert_eq!(mover.hand[0].key, CardKey::from("windfall"));
    assert_eq!(orch.state().phase, TurnPhase::FreeAction);

    assert!(submit(&mut orch, pid(1), Intent::EndTurn).is_accepted());
    let record = orch.get_turn_record(1).unwrap();
    assert_eq!(record.roll, Some(4));
    assert_eq!(record.movement.map(|m| (m.from, m.to)), Some((0, 4)));
    assert!(record
        .outcomes
        .iter()
        .flat_map(|o| &o.changes)
        .any(|c| matches!(c, StateChange::CardDrawn { player, .. } if *player == pid(1))));

    let released = drain(&mut events);
    assert!(released.iter().any(|e| matches!(e, GameEventData::EffectResolved { .. })));
    assert!(released.contains(&GameEventData::TurnStarted { player: pid(2) }));
}

#[test]
fn test_disconnect_during_free_action_auto_passes() {
    let mut orch = started(context(ContentRegistry::standard(), 3), &[pid(1), pid(2), pid(3)]);
    finish_turn(&mut orch);

    let b = pid(2);
    assert!(submit(&mut orch, b, Intent::RollDice).is_accepted());
    assert!(submit(&mut orch, b, Intent::Move).is_accepted());
    assert_eq!(orch.state().phase, TurnPhase::FreeAction);

    let mut events = orch.subscribe();
    let t0 = Instant::now();
    orch.player_disconnected(b, t0).unwrap();
    assert_eq!(drain(&mut events), vec![GameEventData::PlayerDisconnected { player: b }]);

    let deadline = orch.next_deadline().unwrap();
    assert!(deadline <= t0 + orch.context().config.timing.disconnected_timeout);
    assert!(orch.poll_deadline(t0).unwrap().is_none());

    let step = orch.poll_deadline(deadline).unwrap().unwrap();
    assert!(step.completed.is_some());
    assert_eq!(orch.state().active_player_id(), Some(pid(3)));
    assert_eq!(orch.state().active_flag_count(), 1);

    let released = drain(&mut events);
    assert!(released.contains(&GameEventData::TurnAutoPassed { player: b, phase: TurnPhase::FreeAction }));

    let record = orch.get_turn_record(2).unwrap();
    assert!(matches!(record.actions.last(), Some(TurnAction::DeadlineElapsed { player, .. }) if *player == b));
}

#[test]
fn test_rejoin_after_three_turns_matches_authority() {
    let ctx = context(ContentRegistry::standard(), 5);
    let mut orch = started(ctx.clone(), &[pid(1), pid(2), pid(3)]);
    let t0 = Instant::now();
    orch.player_disconnected(pid(3), t0).unwrap();

    for _ in 0..3 {
        finish_turn(&mut orch);
    }
    assert_eq!(orch.state().turn_number, 4);

    let ticket = orch.rejoin_ticket(&pid(3)).unwrap();
    let bundle = orch
        .request_rejoin(pid(3), 1, &ticket, t0 + Duration::from_secs(1))
        .unwrap();
    assert_eq!(bundle.last_sequence(), 3);
    assert_eq!(orch.state().player(&pid(3)).unwrap().connection, ConnectionStatus::Reconnecting);

    let restored = bundle.restore(ctx.content.clone(), &ctx.config.rules).unwrap();
    assert_eq!(restored.state().compute_hash(), orch.state().compute_hash());

    let replica = ReplicaSession::from_bundle(ctx, pid(3), &bundle, Instant::now()).unwrap();
    assert_eq!(replica.state().compute_hash(), orch.state().compute_hash());
    assert_eq!(replica.last_sequence(), 3);

    orch.confirm_rejoin(pid(3), t0 + Duration::from_secs(2)).unwrap();
    assert_eq!(orch.state().player(&pid(3)).unwrap().connection, ConnectionStatus::Connected);
}

#[test]
fn test_second_trade_accept_fails_precondition() {
    let mut orch = started(context(ContentRegistry::standard(), 8), &[pid(1), pid(2), pid(3)]);
    assert!(submit(&mut orch, pid(1), Intent::RollDice).is_accepted());
    assert!(submit(&mut orch, pid(1), Intent::Move).is_accepted());
    assert_eq!(orch.state().phase, TurnPhase::FreeAction);

    let terms = TradeTerms {
        give: Resources { wood: 1, ..Default::default() },
        want: Resources { food: 1, ..Default::default() },
        card: None,
    };
    assert!(submit(&mut orch, pid(1), Intent::ProposeTrade { terms, target: None }).is_accepted());
    let offer_id = orch.state().trade_offers.last().unwrap().id;

    assert!(submit(&mut orch, pid(2), Intent::AcceptTrade { offer_id }).is_accepted());
    let after_first = orch.state().clone();

    let second = submit(&mut orch, pid(3), Intent::AcceptTrade { offer_id });
    assert!(
        matches!(second, IntentReply::Failed { error: EngineError::PreconditionNoLongerMet(_) }),
        "{second:?}"
    );
    assert_eq!(orch.state().players, after_first.players);
    assert_eq!(orch.state().player(&pid(3)).unwrap().last_intent_seq, 1);

    // Withdrawn by the sender before dequeue: nothing recorded.
    orch.enqueue_intent(pid(2), 2, Intent::AcceptTrade { offer_id }).unwrap();
    assert!(orch.withdraw_intent(&pid(2), 2));
    assert_eq!(orch.pending_intents(), 0);
}

#[test]
fn test_effect_loop_rolls_back_resolution() {
    let mut tables = standard_tables();
    tables.board.tiles = board_of(TileKind::EventDraw);
    tables.events.push(EventCardData {
        key: "echo".into(),
        name: "Echo".into(),
        actions: vec![
            CardAction::Resource { resource: Resource::Gold, delta: 1 },
            CardAction::Event { event: "echo".into() },
        ],
    });
    tables.event_deck = vec!["echo".into()];
    let content = ContentRegistry::from_tables(tables).unwrap();

    let mut orch = started(context(content, 1), &[pid(1), pid(2)]);
    assert!(submit(&mut orch, pid(1), Intent::RollDice).is_accepted());
    let before = orch.state().clone();

    let reply = submit(&mut orch, pid(1), Intent::Move);
    assert!(
        matches!(reply, IntentReply::Failed { error: EngineError::EffectLoopDetected { .. } }),
        "{reply:?}"
    );

    let mover = orch.state().player(&pid(1)).unwrap();
    assert_ne!(mover.position, 0);
    assert_eq!(mover.resources, before.players[0].resources);
    assert_eq!(orch.state().board.hazard_level, before.board.hazard_level);
    assert_eq!(orch.state().phase, TurnPhase::FreeAction);
    assert!(!orch.status().is_terminated());

    assert!(submit(&mut orch, pid(1), Intent::EndTurn).is_accepted());
    let record = orch.get_turn_record(1).unwrap();
    assert!(record
        .failures
        .iter()
        .any(|f| matches!(f, EngineError::EffectLoopDetected { .. })));
}

#[test]
fn test_rejected_intents_leave_no_trace() {
    let mut orch = started(context(ContentRegistry::standard(), 2), &[pid(1), pid(2)]);
    let hash = orch.state().compute_hash();

    let reply = submit(&mut orch, pid(2), Intent::RollDice);
    assert_eq!(reply, IntentReply::Rejected { reason: RejectReason::NotYourTurn });
    let reply = submit(&mut orch, pid(1), Intent::EndTurn);
    assert!(matches!(reply, IntentReply::Rejected { .. }));

    assert_eq!(orch.state().compute_hash(), hash);
    assert!(orch.engine().in_flight_actions().is_empty());
}
