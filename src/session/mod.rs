//! Session Layer
//!
//! Authority, reconnection and orchestration around the deterministic engine.
//!
//! - `context`: explicit per-session dependencies and the `Lifecycle` trait
//! - `authority`: write role, rejoin credentials, reachability
//! - `orchestrator`: the authoritative driver (journal, deadlines, rejoin)
//! - `handle`: single-writer engine task and its cloneable handle
//! - `replica`: a participant's verified local copy

pub mod context;
pub mod authority;
pub mod orchestrator;
pub mod handle;
pub mod replica;

pub use context::{Lifecycle, SessionContext, SessionId};
pub use authority::{Role, SessionAuthority, SessionStatus};
pub use orchestrator::{GameOrchestrator, IntentReply, Push, RejoinBundle, SessionView};
pub use handle::SessionHandle;
pub use replica::{PushOutcome, ReplicaSession};
