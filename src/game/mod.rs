//! Game Logic Module
//!
//! All game simulation code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `state`: PlayerState store, board and full game state
//! - `content`: Immutable card/event/reward tables and board layout
//! - `effects`: Effect variants and one resolver per tag
//! - `passive`: Observer list re-checked after every pipeline step
//! - `pipeline`: Ordered, bounded effect resolution
//! - `intent`: Player intents and the serialized intent queue
//! - `turn`: Turn state machine
//! - `events`: Game events for subscribers

pub mod state;
pub mod content;
pub mod effects;
pub mod passive;
pub mod pipeline;
pub mod intent;
pub mod turn;
pub mod events;

// Re-export key types
pub use state::{GameState, PlayerState, PlayerId, Resource, Resources, ConnectionStatus};
pub use content::ContentRegistry;
pub use effects::{Effect, EffectOutcome, OutcomeStatus, StateChange, TradeTerms};
pub use intent::{Intent, IntentQueue, PendingIntent};
pub use turn::{StepResult, TurnAction, TurnEngine, TurnPhase};
pub use events::{GameEvent, GameEventData};
