//! Property tests: same inputs, same session; records stay gapless and
//! replayable; at most one player ever holds the turn.

use proptest::prelude::*;
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

use boardsync::config::EngineConfig;
use boardsync::game::content::ContentRegistry;
use boardsync::game::effects::TradeTerms;
use boardsync::game::intent::Intent;
use boardsync::game::state::{PlayerId, Resources};
use boardsync::game::turn::TurnPhase;
use boardsync::journal::{replay_from, TurnRecord};
use boardsync::network::AuthConfig;
use boardsync::session::{GameOrchestrator, Push, SessionContext};

/// One scripted move by whoever may act.
#[derive(Clone, Debug)]
enum Step {
    /// Advance the active player's turn by one intent.
    Advance,
    BuyTile,
    /// Offer one wood for one food.
    Offer,
    /// Seat `n` (mod players) accepts the newest offer.
    Accept(u8),
    /// Active player misses the phase deadline.
    Timeout,
    /// Seat `n` (mod players) drops, or comes back if already gone.
    Toggle(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => Just(Step::Advance),
        1 => Just(Step::BuyTile),
        1 => Just(Step::Offer),
        1 => any::<u8>().prop_map(Step::Accept),
        1 => Just(Step::Timeout),
        1 => any::<u8>().prop_map(Step::Toggle),
    ]
}

struct Run {
    orch: GameOrchestrator,
    pushes: Receiver<Push>,
    records: Vec<TurnRecord>,
}

fn start(session: u8, seats: u8) -> Run {
    let ctx = SessionContext::new(EngineConfig::default(), ContentRegistry::standard(), AuthConfig::default())
        .with_session_id([session; 16]);
    let players: Vec<PlayerId> = (1..=seats).map(|n| PlayerId::new([n; 16])).collect();
    let mut orch = GameOrchestrator::new(ctx, &players).unwrap();
    let pushes = orch.subscribe_pushes();
    orch.start(Instant::now()).unwrap();
    Run { orch, pushes, records: Vec::new() }
}

fn submit(orch: &mut GameOrchestrator, player: PlayerId, intent: Intent) {
    let seq = orch.state().player(&player).map_or(1, |p| p.last_intent_seq + 1);
    orch.submit_intent(player, seq, intent, Instant::now());
}

fn play(run: &mut Run, step: &Step) {
    let orch = &mut run.orch;
    if orch.is_game_over() {
        return;
    }
    let players: Vec<PlayerId> = orch.state().players.iter().map(|p| p.id).collect();
    let seat = |n: u8| players[n as usize % players.len()];
    let Some(active) = orch.state().active_player_id() else { return };

    match step {
        Step::Advance => {
            let intent = match orch.state().phase {
                TurnPhase::AwaitingRoll => Intent::RollDice,
                TurnPhase::Moving { .. } => Intent::Move,
                _ => Intent::EndTurn,
            };
            submit(orch, active, intent);
        }
        Step::BuyTile => submit(orch, active, Intent::BuyTile),
        Step::Offer => {
            let terms = TradeTerms {
                give: Resources { wood: 1, ..Default::default() },
                want: Resources { food: 1, ..Default::default() },
                card: None,
            };
            submit(orch, active, Intent::ProposeTrade { terms, target: None });
        }
        Step::Accept(n) => {
            if let Some(offer_id) = orch.state().trade_offers.last().map(|o| o.id) {
                submit(orch, seat(*n), Intent::AcceptTrade { offer_id });
            }
        }
        Step::Timeout => {
            if let Some(deadline) = orch.next_deadline() {
                orch.poll_deadline(deadline).unwrap();
            }
        }
        Step::Toggle(n) => {
            let player = seat(*n);
            let connected = orch.state().player(&player).is_some_and(|p| p.is_connected());
            if connected {
                orch.player_disconnected(player, Instant::now()).unwrap();
            } else if let Some(ticket) = orch.rejoin_ticket(&player) {
                let turn = orch.state().turn_number;
                orch.request_rejoin(player, turn, &ticket, Instant::now()).unwrap();
                orch.confirm_rejoin(player, Instant::now()).unwrap();
            }
        }
    }

    while let Ok(push) = run.pushes.try_recv() {
        if let Push::Record { record } = push {
            run.records.push(record);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_same_script_same_session(
        session in any::<u8>(),
        seats in 2u8..=4,
        script in prop::collection::vec(step_strategy(), 1..120),
    ) {
        let mut a = start(session, seats);
        let mut b = start(session, seats);
        for step in &script {
            play(&mut a, step);
            play(&mut b, step);
            prop_assert_eq!(a.orch.state().compute_hash(), b.orch.state().compute_hash());
        }
        prop_assert_eq!(&a.records, &b.records);
    }

    #[test]
    fn prop_turn_invariants_hold(
        session in any::<u8>(),
        seats in 2u8..=4,
        script in prop::collection::vec(step_strategy(), 1..160),
    ) {
        let mut run = start(session, seats);
        let initial = run.orch.get_snapshot().unwrap();

        for step in &script {
            play(&mut run, step);
            let state = run.orch.state();
            if run.orch.is_game_over() {
                prop_assert_eq!(state.active_flag_count(), 0);
            } else {
                prop_assert_eq!(state.active_flag_count(), 1);
            }
        }

        // Gapless, starting at one.
        for (i, record) in run.records.iter().enumerate() {
            prop_assert_eq!(record.sequence, i as u64 + 1);
        }

        // Replay from the first snapshot lands on the last boundary.
        let ctx = run.orch.context();
        let replayed = replay_from(&initial, &run.records, ctx.content.clone(), &ctx.config.rules).unwrap();
        let boundary = run.orch.get_snapshot().unwrap();
        prop_assert_eq!(replayed.state().compute_hash(), boundary.state.compute_hash());
    }
}
