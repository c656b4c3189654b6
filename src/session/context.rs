//! Session Context
//!
//! The explicit registry every session component receives at construction:
//! configuration, content tables, auth settings and the session id. Built once
//! per session and passed by reference; nothing here is process-global.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::game::content::ContentRegistry;
use crate::network::auth::AuthConfig;

/// Session identifier (UUID bytes).
pub type SessionId = [u8; 16];

/// Shared, read-only session dependencies.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub config: Arc<EngineConfig>,
    pub content: Arc<ContentRegistry>,
    pub auth: Arc<AuthConfig>,
}

impl SessionContext {
    pub fn new(config: EngineConfig, content: ContentRegistry, auth: AuthConfig) -> Self {
        Self {
            session_id: *uuid::Uuid::new_v4().as_bytes(),
            config: Arc::new(config),
            content: Arc::new(content),
            auth: Arc::new(auth),
        }
    }

    /// Same dependencies, explicit id.
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Default config, standard content, no JWT.
    pub fn standard() -> Self {
        Self::new(EngineConfig::default(), ContentRegistry::standard(), AuthConfig::default())
    }

    pub fn session_hex(&self) -> String {
        hex::encode(&self.session_id[..4])
    }
}

/// Explicit start/stop for session components.
pub trait Lifecycle {
    /// Bring the component up. Called once by the orchestrator.
    fn start(&mut self, ctx: &SessionContext) -> Result<(), EngineError>;

    /// Release the component. Must be idempotent.
    fn stop(&mut self, ctx: &SessionContext);
}
