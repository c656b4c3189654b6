//! Snapshot/Record Journal
//!
//! Turn records, full-state snapshots, checkpoint retention and replay.

pub mod record;
pub mod snapshot;
pub mod store;

pub use record::{Movement, RecordBuilder, TurnRecord};
pub use snapshot::GameSnapshot;
pub use store::{replay_from, replay_in_flight, replay_record, Journal};
