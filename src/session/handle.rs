//! Session Engine Task
//!
//! Runs a [`GameOrchestrator`] on one tokio task. All mutation happens there:
//! commands arrive over an mpsc channel, replies go back over oneshot
//! channels, and status is published on a `watch` channel so queries never
//! wait behind the intent queue.
//!
//! Each loop iteration drains every waiting command, then runs exactly one
//! queued intent. A withdraw that arrives before its intent is dequeued
//! therefore always wins.

use std::collections::BTreeMap;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::game::events::GameEvent;
use crate::game::intent::Intent;
use crate::game::state::PlayerId;
use crate::journal::{GameSnapshot, TurnRecord};
use crate::session::orchestrator::{GameOrchestrator, IntentReply, Push, RejoinBundle, SessionView};

const COMMAND_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<T>;

/// Requests handled by the engine task.
enum Command {
    Submit { player: PlayerId, sequence: u64, intent: Intent, reply: Reply<IntentReply> },
    Withdraw { player: PlayerId, sequence: u64, reply: Reply<bool> },
    Disconnect { player: PlayerId, reply: Reply<Result<(), EngineError>> },
    RequestRejoin {
        player: PlayerId,
        last_known_turn: u64,
        credential: String,
        reply: Reply<Result<RejoinBundle, EngineError>>,
    },
    ConfirmRejoin { player: PlayerId, reply: Reply<Result<(), EngineError>> },
    Resync { player: PlayerId, last_sequence: u64, reply: Reply<Result<RejoinBundle, EngineError>> },
    Snapshot { reply: Reply<Result<GameSnapshot, EngineError>> },
    TurnRecord { turn: u64, reply: Reply<Result<TurnRecord, EngineError>> },
    RejoinTicket { player: PlayerId, reply: Reply<Option<String>> },
    Stop,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionView>,
    events: broadcast::Sender<GameEvent>,
    pushes: broadcast::Sender<Push>,
}

impl SessionHandle {
    /// Start `orchestrator` and move it onto its own task.
    pub fn spawn(mut orchestrator: GameOrchestrator) -> Result<(Self, JoinHandle<()>), EngineError> {
        if !orchestrator.engine().is_started() {
            orchestrator.start(Instant::now())?;
        }

        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status) = watch::channel(orchestrator.view());
        let handle = Self {
            commands,
            status,
            events: orchestrator.event_sender(),
            pushes: orchestrator.push_sender(),
        };

        let task = tokio::spawn(run(orchestrator, rx, status_tx));
        Ok((handle, task))
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::SessionNotActive)?;
        rx.await.map_err(|_| EngineError::SessionNotActive)
    }

    pub async fn submit_intent(
        &self,
        player: PlayerId,
        sequence: u64,
        intent: Intent,
    ) -> Result<IntentReply, EngineError> {
        self.request(|reply| Command::Submit { player, sequence, intent, reply }).await
    }

    pub async fn withdraw_intent(&self, player: PlayerId, sequence: u64) -> Result<bool, EngineError> {
        self.request(|reply| Command::Withdraw { player, sequence, reply }).await
    }

    pub async fn player_disconnected(&self, player: PlayerId) -> Result<(), EngineError> {
        self.request(|reply| Command::Disconnect { player, reply }).await?
    }

    pub async fn request_rejoin(
        &self,
        player: PlayerId,
        last_known_turn: u64,
        credential: String,
    ) -> Result<RejoinBundle, EngineError> {
        self.request(|reply| Command::RequestRejoin { player, last_known_turn, credential, reply })
            .await?
    }

    pub async fn confirm_rejoin(&self, player: PlayerId) -> Result<(), EngineError> {
        self.request(|reply| Command::ConfirmRejoin { player, reply }).await?
    }

    /// Full state resend; connection status is left alone.
    pub async fn request_resync(&self, player: PlayerId, last_sequence: u64) -> Result<RejoinBundle, EngineError> {
        self.request(|reply| Command::Resync { player, last_sequence, reply }).await?
    }

    pub async fn get_snapshot(&self) -> Result<GameSnapshot, EngineError> {
        self.request(|reply| Command::Snapshot { reply }).await?
    }

    pub async fn get_turn_record(&self, turn: u64) -> Result<TurnRecord, EngineError> {
        self.request(|reply| Command::TurnRecord { turn, reply }).await?
    }

    pub async fn rejoin_ticket(&self, player: PlayerId) -> Result<Option<String>, EngineError> {
        self.request(|reply| Command::RejoinTicket { player, reply }).await
    }

    /// Stop the engine task. Later requests fail with `SessionNotActive`.
    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Stop).await;
    }

    /// Latest published status.
    pub fn status(&self) -> SessionView {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionView> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_pushes(&self) -> broadcast::Receiver<Push> {
        self.pushes.subscribe()
    }
}

// =============================================================================
// ENGINE TASK
// =============================================================================

enum Flow {
    Continue,
    Stop,
}

struct EngineTask {
    orchestrator: GameOrchestrator,
    replies: BTreeMap<(PlayerId, u64), Reply<IntentReply>>,
    status: watch::Sender<SessionView>,
}

async fn run(
    orchestrator: GameOrchestrator,
    mut commands: mpsc::Receiver<Command>,
    status: watch::Sender<SessionView>,
) {
    let mut task = EngineTask { orchestrator, replies: BTreeMap::new(), status };
    let session = task.orchestrator.context().session_hex();
    info!(session = %session, "engine task started");

    loop {
        // Drain everything already waiting before touching the queue.
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if let Flow::Stop = task.handle(command) {
                        task.shutdown();
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    task.shutdown();
                    return;
                }
            }
        }

        if task.step_one() {
            task.publish();
            continue;
        }
        task.publish();

        if task.orchestrator.status().is_terminated() {
            task.shutdown();
            return;
        }

        let deadline = task.orchestrator.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if let Flow::Stop = task.handle(command) {
                        task.shutdown();
                        return;
                    }
                }
                None => {
                    task.shutdown();
                    return;
                }
            },
            _ = wait_until(deadline) => {
                if let Err(err) = task.orchestrator.poll_deadline(Instant::now()) {
                    error!(session = %session, error = %err, "deadline action failed");
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl EngineTask {
    fn handle(&mut self, command: Command) -> Flow {
        let now = Instant::now();
        let orch = &mut self.orchestrator;
        match command {
            Command::Submit { player, sequence, intent, reply } => {
                match orch.enqueue_intent(player, sequence, intent) {
                    Ok(()) => {
                        self.replies.insert((player, sequence), reply);
                    }
                    Err(err) => {
                        let _ = reply.send(IntentReply::from_error(err));
                    }
                }
            }
            Command::Withdraw { player, sequence, reply } => {
                let withdrawn = orch.withdraw_intent(&player, sequence);
                if withdrawn {
                    if let Some(waiting) = self.replies.remove(&(player, sequence)) {
                        let _ = waiting.send(IntentReply::Withdrawn);
                    }
                    debug!(player = %player, sequence, "intent withdrawn");
                }
                let _ = reply.send(withdrawn);
            }
            Command::Disconnect { player, reply } => {
                let _ = reply.send(orch.player_disconnected(player, now));
            }
            Command::RequestRejoin { player, last_known_turn, credential, reply } => {
                let _ = reply.send(orch.request_rejoin(player, last_known_turn, &credential, now));
            }
            Command::ConfirmRejoin { player, reply } => {
                let _ = reply.send(orch.confirm_rejoin(player, now));
            }
            Command::Resync { player, last_sequence, reply } => {
                let _ = reply.send(orch.request_resync(player, last_sequence));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(orch.get_snapshot());
            }
            Command::TurnRecord { turn, reply } => {
                let _ = reply.send(orch.get_turn_record(turn));
            }
            Command::RejoinTicket { player, reply } => {
                let _ = reply.send(orch.rejoin_ticket(&player));
            }
            Command::Stop => return Flow::Stop,
        }
        Flow::Continue
    }

    /// Run one queued intent. False when the queue was empty.
    fn step_one(&mut self) -> bool {
        match self.orchestrator.process_next(Instant::now()) {
            Some((pending, reply)) => {
                if let Some(waiting) = self.replies.remove(&(pending.player, pending.sequence)) {
                    let _ = waiting.send(reply);
                }
                true
            }
            None => false,
        }
    }

    fn publish(&self) {
        let view = self.orchestrator.view();
        self.status.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        self.orchestrator.stop();
        for (_, waiting) in std::mem::take(&mut self.replies) {
            let _ = waiting.send(IntentReply::Failed { error: EngineError::SessionNotActive });
        }
        self.publish();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::EngineConfig;
    use crate::game::content::ContentRegistry;
    use crate::game::turn::TurnPhase;
    use crate::network::auth::AuthConfig;
    use crate::session::authority::SessionStatus;
    use crate::session::context::SessionContext;

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn spawn(config: EngineConfig) -> SessionHandle {
        let ctx = SessionContext::new(config, ContentRegistry::standard(), AuthConfig::default());
        let orch = GameOrchestrator::new(ctx, &[pid(1), pid(2)]).unwrap();
        SessionHandle::spawn(orch).unwrap().0
    }

    #[tokio::test]
    async fn test_submit_through_task() {
        let handle = spawn(EngineConfig::default());
        let player = handle.status().active_player.unwrap();

        let reply = handle.submit_intent(player, 1, Intent::RollDice).await.unwrap();
        assert_eq!(reply, IntentReply::Accepted { turn: 1 });

        let reply = handle.submit_intent(pid(9), 1, Intent::RollDice).await.unwrap();
        assert!(matches!(reply, IntentReply::Rejected { .. }));

        let mut status = handle.watch_status();
        status.wait_for(|v| matches!(v.phase, TurnPhase::Moving { .. })).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_turn_and_queries() {
        let handle = spawn(EngineConfig::default());
        let player = handle.status().active_player.unwrap();
        let mut events = handle.subscribe();

        for (seq, intent) in [Intent::RollDice, Intent::Move, Intent::EndTurn].into_iter().enumerate() {
            let reply = handle.submit_intent(player, seq as u64 + 1, intent).await.unwrap();
            assert!(reply.is_accepted(), "{reply:?}");
        }

        let record = handle.get_turn_record(1).await.unwrap();
        assert_eq!(record.acting_player, player);
        assert_eq!(handle.get_snapshot().await.unwrap().sequence, 1);
        assert!(matches!(handle.get_turn_record(2).await, Err(EngineError::TurnNotFound(2))));

        let first = events.recv().await.unwrap();
        assert_eq!(first.turn, 1);
    }

    #[tokio::test]
    async fn test_deadline_fires_on_task() {
        let mut config = EngineConfig::default();
        config.timing.roll_deadline = Some(Duration::from_millis(30));
        let handle = spawn(config);
        let first = handle.status().active_player.unwrap();

        let mut status = handle.watch_status();
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|v| v.last_sequence >= 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_ne!(view.active_player, Some(first));
    }

    #[tokio::test]
    async fn test_resync_through_task() {
        let handle = spawn(EngineConfig::default());
        let player = handle.status().active_player.unwrap();

        let bundle = handle.request_resync(player, 0).await.unwrap();
        assert_eq!(bundle.snapshot.sequence, 0);
        assert!(bundle.in_flight.is_empty());
        assert!(matches!(handle.request_resync(pid(9), 0).await, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let handle = spawn(EngineConfig::default());
        handle.stop().await;

        let mut status = handle.watch_status();
        status.wait_for(|v| v.status.is_terminated()).await.unwrap();
        assert!(matches!(handle.status().status, SessionStatus::Terminated { .. }));
        assert_eq!(handle.get_snapshot().await, Err(EngineError::SessionNotActive));
    }
}
