//! Journal Store
//!
//! Append-only record log with periodic checkpoints, plus the replay routine
//! that rebuilds state from a checkpoint and the records after it.
//!
//! Retention only covers the reconnection window: once a checkpoint falls out
//! of the retained set, records it already covers are pruned with it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{JournalConfig, RulesConfig};
use crate::error::EngineError;
use crate::game::content::ContentRegistry;
use crate::game::turn::{TurnAction, TurnEngine};
use crate::journal::record::TurnRecord;
use crate::journal::snapshot::GameSnapshot;

/// An encoded checkpoint.
#[derive(Clone, Debug)]
struct Checkpoint {
    sequence: u64,
    bytes: Vec<u8>,
}

/// Record log and checkpoint store for one session.
#[derive(Debug)]
pub struct Journal {
    config: JournalConfig,
    records: VecDeque<TurnRecord>,
    checkpoints: VecDeque<Checkpoint>,
    last_sequence: u64,
}

impl Journal {
    /// Create a journal whose first checkpoint is `initial`.
    pub fn new(config: JournalConfig, initial: &GameSnapshot) -> Result<Self, EngineError> {
        let mut journal = Self {
            config,
            records: VecDeque::new(),
            checkpoints: VecDeque::new(),
            last_sequence: initial.sequence,
        };
        journal.checkpoint(initial)?;
        Ok(journal)
    }

    /// Append the next record. Sequence numbers must be gapless.
    pub fn append_record(&mut self, record: TurnRecord) -> Result<(), EngineError> {
        let expected = self.last_sequence + 1;
        if record.sequence != expected {
            return Err(EngineError::RecordOutOfOrder { expected, got: record.sequence });
        }
        self.last_sequence = record.sequence;
        self.records.push_back(record);
        Ok(())
    }

    /// True when the last appended record lands on the checkpoint cadence.
    pub fn is_checkpoint_due(&self) -> bool {
        let interval = self.config.checkpoint_interval.max(1);
        self.last_sequence > 0 && self.last_sequence % interval == 0
    }

    /// Store a checkpoint taken right after the last appended record.
    pub fn checkpoint(&mut self, snapshot: &GameSnapshot) -> Result<(), EngineError> {
        if snapshot.sequence != self.last_sequence {
            return Err(EngineError::RecordOutOfOrder {
                expected: self.last_sequence,
                got: snapshot.sequence,
            });
        }
        let bytes = snapshot.encode()?;
        self.checkpoints.push_back(Checkpoint { sequence: snapshot.sequence, bytes });
        self.prune();
        Ok(())
    }

    fn prune(&mut self) {
        let retained = self.config.retained_checkpoints.max(1);
        while self.checkpoints.len() > retained {
            self.checkpoints.pop_front();
        }
        if let Some(oldest) = self.checkpoints.front().map(|c| c.sequence) {
            while self.records.front().is_some_and(|r| r.sequence <= oldest) {
                self.records.pop_front();
            }
        }
    }

    /// Decode the newest checkpoint.
    pub fn latest_checkpoint(&self) -> Result<GameSnapshot, EngineError> {
        let checkpoint = self
            .checkpoints
            .back()
            .ok_or_else(|| EngineError::JournalCorrupted("no checkpoint retained".into()))?;
        GameSnapshot::decode(&checkpoint.bytes)
    }

    /// Retained records with sequence greater than `sequence`.
    pub fn records_after(&self, sequence: u64) -> Result<Vec<TurnRecord>, EngineError> {
        if sequence < self.last_sequence {
            let first_retained = self.records.front().map_or(self.last_sequence + 1, |r| r.sequence);
            if sequence + 1 < first_retained {
                return Err(EngineError::TurnNotFound(sequence + 1));
            }
        }
        Ok(self
            .records
            .iter()
            .filter(|r| r.sequence > sequence)
            .cloned()
            .collect())
    }

    pub fn get(&self, sequence: u64) -> Option<&TurnRecord> {
        let first = self.records.front()?.sequence;
        let index = sequence.checked_sub(first)? as usize;
        self.records.get(index)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn checkpoint_sequences(&self) -> Vec<u64> {
        self.checkpoints.iter().map(|c| c.sequence).collect()
    }
}

// =============================================================================
// REPLAY
// =============================================================================

/// Rebuild an engine from `snapshot` and the records after it.
///
/// Records at or below the snapshot's sequence are skipped. Every replayed
/// record must reproduce its checksum.
pub fn replay_from(
    snapshot: &GameSnapshot,
    records: &[TurnRecord],
    content: Arc<ContentRegistry>,
    rules: &RulesConfig,
) -> Result<TurnEngine, EngineError> {
    snapshot.verify()?;
    if snapshot.content_fingerprint != content.fingerprint() {
        return Err(EngineError::JournalCorrupted(
            "snapshot was produced with different content".into(),
        ));
    }

    let mut engine = TurnEngine::new(snapshot.state.clone(), content, rules.clone());
    let mut expected = snapshot.sequence + 1;
    for record in records.iter().filter(|r| r.sequence > snapshot.sequence) {
        if record.sequence != expected {
            return Err(EngineError::RecordOutOfOrder { expected, got: record.sequence });
        }
        replay_record(&mut engine, record)?;
        expected += 1;
    }
    Ok(engine)
}

/// Re-apply one record's actions and check the sealed checksum.
pub fn replay_record(engine: &mut TurnEngine, record: &TurnRecord) -> Result<(), EngineError> {
    let mut sealed: Option<TurnRecord> = None;

    for action in &record.actions {
        if sealed.is_some() {
            return Err(diverged(engine, record));
        }
        let step = engine.apply(action.clone()).map_err(|_| diverged(engine, record))?;
        sealed = step.completed;
    }

    match sealed {
        Some(replayed) if replayed.sequence == record.sequence && replayed.checksum == record.checksum => Ok(()),
        Some(replayed) => Err(EngineError::desync(record.sequence, &record.checksum, &replayed.checksum)),
        None => Err(diverged(engine, record)),
    }
}

/// Apply in-flight actions of the current turn on top of a boundary state.
pub fn replay_in_flight(engine: &mut TurnEngine, actions: &[TurnAction]) -> Result<(), EngineError> {
    for action in actions {
        let step = engine.apply(action.clone()).map_err(|e| {
            EngineError::JournalCorrupted(format!("in-flight action rejected on replay: {e}"))
        })?;
        if step.completed.is_some() {
            return Err(EngineError::JournalCorrupted(
                "in-flight actions completed a turn".into(),
            ));
        }
    }
    Ok(())
}

fn diverged(engine: &TurnEngine, record: &TurnRecord) -> EngineError {
    EngineError::desync(record.sequence, &record.checksum, &engine.state().compute_hash())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::intent::Intent;
    use crate::game::state::{GameState, PlayerId};
    use crate::game::turn::TurnPhase;

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    struct Fixture {
        engine: TurnEngine,
        initial: GameSnapshot,
        records: Vec<TurnRecord>,
    }

    /// Play `turns` turns: roll, move, end.
    fn play(turns: u64) -> Fixture {
        let content = Arc::new(ContentRegistry::standard());
        let rules = RulesConfig::default();
        let state = GameState::new(&[pid(1), pid(2), pid(3)], 2024, &content, rules.starting_resources);
        let mut engine = TurnEngine::new(state, content.clone(), rules);
        engine.start().expect("start");
        let initial = GameSnapshot::capture([0; 16], 0, engine.state(), content.fingerprint());

        let mut records = Vec::new();
        let mut seq = [0u64; 3];
        while (records.len() as u64) < turns && !engine.is_game_over() {
            let seat = engine.state().active_seat as usize;
            let player = engine.state().players[seat].id;
            seq[seat] += 1;
            let intent = match engine.phase() {
                TurnPhase::AwaitingRoll => Intent::RollDice,
                TurnPhase::Moving { .. } => Intent::Move,
                _ => Intent::EndTurn,
            };
            let step = engine
                .apply(TurnAction::Intent { player, sequence: seq[seat], intent })
                .expect("apply");
            records.extend(step.completed);
        }
        Fixture { engine, initial, records }
    }

    #[test]
    fn test_append_enforces_gapless_sequence() {
        let fx = play(3);
        let mut journal = Journal::new(JournalConfig::default(), &fx.initial).expect("journal");

        journal.append_record(fx.records[0].clone()).expect("first");
        let err = journal.append_record(fx.records[2].clone());
        assert_eq!(err, Err(EngineError::RecordOutOfOrder { expected: 2, got: 3 }));
        journal.append_record(fx.records[1].clone()).expect("second");
        assert_eq!(journal.last_sequence(), 2);
        assert_eq!(journal.get(2).map(|r| r.sequence), Some(2));
        assert!(journal.get(7).is_none());
    }

    #[test]
    fn test_replay_reproduces_state() {
        let fx = play(6);
        let replayed = replay_from(&fx.initial, &fx.records, fx.engine.content().clone(), fx.engine.rules())
            .expect("replay");
        assert_eq!(replayed.state().compute_hash(), fx.engine.state().compute_hash());
        assert_eq!(replayed.state(), fx.engine.state());
    }

    #[test]
    fn test_tampered_record_detected() {
        let fx = play(3);
        let mut records = fx.records.clone();
        records[1].checksum[0] ^= 0xff;

        let err = replay_from(&fx.initial, &records, fx.engine.content().clone(), fx.engine.rules());
        assert!(matches!(err, Err(EngineError::DesyncDetected { sequence: 2, .. })));
    }

    #[test]
    fn test_checkpoints_prune_old_records() {
        let fx = play(9);
        let config = JournalConfig { checkpoint_interval: 2, retained_checkpoints: 2 };
        let mut journal = Journal::new(config, &fx.initial).expect("journal");

        // Rebuild boundary states by replaying record by record.
        let mut engine = TurnEngine::new(
            fx.initial.state.clone(),
            fx.engine.content().clone(),
            fx.engine.rules().clone(),
        );
        for record in &fx.records {
            replay_record(&mut engine, record).expect("replay");
            journal.append_record(record.clone()).expect("append");
            if journal.is_checkpoint_due() {
                let snap = GameSnapshot::capture(
                    [0; 16],
                    record.sequence,
                    engine.state(),
                    engine.content().fingerprint(),
                );
                journal.checkpoint(&snap).expect("checkpoint");
            }
        }

        assert_eq!(journal.checkpoint_sequences(), vec![6, 8]);
        assert_eq!(journal.records_after(6).expect("after").len(), 3);
        assert!(matches!(journal.records_after(2), Err(EngineError::TurnNotFound(3))));

        let latest = journal.latest_checkpoint().expect("latest");
        let tail = journal.records_after(latest.sequence).expect("tail");
        let rebuilt = replay_from(&latest, &tail, fx.engine.content().clone(), fx.engine.rules())
            .expect("replay");
        assert_eq!(rebuilt.state().compute_hash(), fx.engine.state().compute_hash());
    }

    #[test]
    fn test_checkpoint_must_match_last_record() {
        let fx = play(2);
        let mut journal = Journal::new(JournalConfig::default(), &fx.initial).expect("journal");
        let wrong = GameSnapshot::capture([0; 16], 5, fx.engine.state(), fx.engine.content().fingerprint());
        assert!(matches!(journal.checkpoint(&wrong), Err(EngineError::RecordOutOfOrder { .. })));
    }
}
