//! Network Layer
//!
//! WebSocket host for one authoritative session.
//! This layer is **non-deterministic**: every state change goes through the
//! session handle into `game/`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, TokenClaims, authenticate_player, validate_token};
pub use protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, RejoinRequest, ServerError, ServerMessage,
    parse_player_id,
};
pub use server::{GameServer, GameServerError, ServerConfig};
