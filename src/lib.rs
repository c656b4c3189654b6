//! # Boardsync Server
//!
//! Authoritative turn engine and state sync for a networked turn-based
//! board and economy game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BOARDSYNC SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ and seed derivation   │
//! │  └── hash.rs     - Canonical state hashing                   │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── state.rs    - PlayerState store and game state          │
//! │  ├── content.rs  - Card, event and reward tables             │
//! │  ├── effects.rs  - Effect variants and resolvers             │
//! │  ├── passive.rs  - Passive observers                         │
//! │  ├── pipeline.rs - Bounded effect resolution                 │
//! │  ├── intent.rs   - Intents and the intent queue              │
//! │  └── turn.rs     - Turn state machine                        │
//! │                                                              │
//! │  journal/        - Turn records, snapshots, replay           │
//! │                                                              │
//! │  session/        - Authority, rejoin, orchestration          │
//! │  ├── orchestrator.rs - Authoritative driver                  │
//! │  ├── handle.rs   - Single-writer engine task                 │
//! │  └── replica.rs  - Participant-side verified copy            │
//! │                                                              │
//! │  network/        - WebSocket host (non-deterministic)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/`, `game/` and `journal/` are deterministic:
//! - No floating-point arithmetic in game logic
//! - No HashMap (BTreeMap and Vec for ordered iteration)
//! - No wall-clock reads; deadlines arrive as explicit actions
//! - All randomness from the session-seeded Xorshift128+
//!
//! Given the same seed, content and action sequence, every replica reaches
//! the same state hash.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod error;
pub mod game;
pub mod journal;
pub mod session;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use core::hash::StateHash;
pub use config::{EngineConfig, JournalConfig, RulesConfig, TimingConfig};
pub use error::{EngineError, RejectReason};
pub use game::state::{GameState, PlayerId, PlayerState};
pub use game::turn::{TurnAction, TurnEngine, TurnPhase};
pub use journal::{GameSnapshot, Journal, TurnRecord};
pub use session::{GameOrchestrator, SessionContext, SessionHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
