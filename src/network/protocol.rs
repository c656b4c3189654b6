//! Protocol Messages
//!
//! Wire format between the session host and its clients. Every message is a
//! JSON object tagged by `type`.

use serde::{Serialize, Deserialize};

use crate::error::{EngineError, RejectReason};
use crate::game::events::GameEvent;
use crate::game::intent::Intent;
use crate::game::state::PlayerId;
use crate::journal::{GameSnapshot, TurnRecord};
use crate::session::orchestrator::{IntentReply, Push, RejoinBundle};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Take a seat.
    Auth(AuthRequest),

    /// Propose an action.
    SubmitIntent { sequence: u64, intent: Intent },

    /// Pull back a queued intent.
    WithdrawIntent { sequence: u64 },

    /// Rejoin a running session on a new connection.
    Rejoin(RejoinRequest),

    /// Bundle applied; finish the rejoin.
    ConfirmRejoin,

    /// Replica fell out of sync; resend full state. Connection status is
    /// unaffected.
    Resync { last_sequence: u64 },

    /// Latest boundary snapshot.
    GetSnapshot,

    /// One sealed record.
    GetTurnRecord { turn: u64 },

    Ping { timestamp: u64 },

    /// Leave the session (treated as a disconnect).
    Leave,
}

/// Join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Hex or UUID player id; ignored when a JWT is supplied
    #[serde(default)]
    pub player_id: Option<String>,
    /// JWT from the identity provider
    #[serde(default)]
    pub token: Option<String>,
    pub client_version: String,
}

/// Rejoin request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejoinRequest {
    pub player_id: String,
    /// Last turn the client saw
    pub last_known_turn: u64,
    /// JWT or the rejoin ticket issued at join
    pub credential: String,
}

/// Parse a player id from 32 hex characters or a UUID string.
pub fn parse_player_id(text: &str) -> Option<PlayerId> {
    if let Some(id) = PlayerId::from_uuid_str(text) {
        return Some(id);
    }
    let bytes = hex::decode(text).ok()?;
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(PlayerId::new(arr))
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from host to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResult(AuthResult),

    /// Seats filled so far, before the session starts.
    Waiting { joined: usize, needed: usize },

    /// All seats taken; turn 1 begins. Carries the starting state for the
    /// client's replica, and its rejoin ticket when JWT auth is off.
    SessionStarted {
        session_id: String,
        players: Vec<PlayerId>,
        rejoin_ticket: Option<String>,
        bundle: RejoinBundle,
    },

    /// Answer to a submitted intent.
    IntentResult { sequence: u64, reply: IntentReply },

    /// Answer to a withdraw.
    WithdrawResult { sequence: u64, withdrawn: bool },

    /// Game event, released in commit order.
    Event { event: GameEvent },

    /// Authoritative update for replicas.
    Push { push: Push },

    Snapshot { snapshot: GameSnapshot },

    TurnRecord { record: TurnRecord },

    /// Catch-up bundle for a rejoining player.
    Rejoin { bundle: RejoinBundle },

    /// Full state resend after a desync.
    Resync { bundle: RejoinBundle },

    /// Authority liveness, sent every heartbeat interval.
    Heartbeat { turn: u64, last_sequence: u64, state_hash: String },

    /// Session ended.
    Terminated { reason: String },

    Error(ServerError),

    Pong { timestamp: u64, server_time: u64 },

    /// Host is shutting down.
    Shutdown,
}

/// Join result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    /// Seat identity (UUID string)
    pub player_id: Option<String>,
    pub error: Option<String>,
    pub server_version: String,
}

/// Host error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailed,
    NotAuthenticated,
    TokenExpired,
    InvalidToken,
    InvalidInput,
    SessionFull,
    AlreadyJoined,
    NotInSession,
    Rejected,
    TurnNotFound,
    SessionNotActive,
    InternalError,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Map an engine error onto a wire error.
    pub fn from_engine(err: &EngineError) -> Self {
        let code = match err {
            EngineError::Validation(RejectReason::Unauthenticated(_)) => ErrorCode::AuthFailed,
            EngineError::Validation(RejectReason::UnknownPlayer) => ErrorCode::NotInSession,
            EngineError::Validation(_) => ErrorCode::Rejected,
            EngineError::TurnNotFound(_) => ErrorCode::TurnNotFound,
            EngineError::SessionNotActive | EngineError::AuthorityLost => ErrorCode::SessionNotActive,
            _ => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<ServerError> for ServerMessage {
    fn from(err: ServerError) -> Self {
        ServerMessage::Error(err)
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
