//! Session Authority
//!
//! Tracks who may write, who may rejoin, and whether the authority is still
//! reachable. One instance per session participant: the host holds
//! `Role::Authoritative`, every replica holds `Role::Replica`.
//!
//! There is no failover. An unreachable authority suspends the session; if it
//! stays unreachable past the grace period the session terminates with
//! [`EngineError::AuthorityLost`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::{EngineError, RejectReason};
use crate::game::state::PlayerId;
use crate::network::auth::{authenticate_player, AuthConfig};
use crate::session::context::{Lifecycle, SessionContext};

const TICKET_DOMAIN: &[u8] = b"BOARDSYNC_REJOIN_V1";

/// Write role of this participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Authoritative,
    Replica,
}

/// Session lifecycle status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started
    #[default]
    Pending,
    Active,
    /// Authority unreachable; waiting out the grace period
    Suspended,
    Terminated { reason: String },
}

impl SessionStatus {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionStatus::Terminated { .. })
    }
}

/// Write authority, rejoin credentials and reachability.
#[derive(Debug)]
pub struct SessionAuthority {
    role: Role,
    status: SessionStatus,
    rejoin_secret: [u8; 16],
    reconnect_window: Duration,
    grace_period: Duration,
    disconnected: BTreeMap<PlayerId, Instant>,
    unreachable_since: Option<Instant>,
}

impl SessionAuthority {
    pub fn new(role: Role, ctx: &SessionContext) -> Self {
        Self {
            role,
            status: SessionStatus::Pending,
            rejoin_secret: *uuid::Uuid::new_v4().as_bytes(),
            reconnect_window: ctx.config.timing.reconnect_window,
            grace_period: ctx.config.timing.grace_period,
            disconnected: BTreeMap::new(),
            unreachable_since: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_authoritative(&self) -> bool {
        self.role == Role::Authoritative
    }

    /// Gate for every local mutation.
    pub fn ensure_writable(&self) -> Result<(), EngineError> {
        if self.role != Role::Authoritative {
            return Err(EngineError::NotAuthoritative);
        }
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Terminated { ref reason } if reason == AUTHORITY_LOST => {
                Err(EngineError::AuthorityLost)
            }
            _ => Err(EngineError::SessionNotActive),
        }
    }

    // =========================================================================
    // REJOIN CREDENTIALS
    // =========================================================================

    /// Session-scoped rejoin ticket for `player`.
    pub fn issue_rejoin_ticket(&self, player: &PlayerId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(TICKET_DOMAIN);
        hasher.update(self.rejoin_secret);
        hasher.update(player.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify a rejoin credential: a JWT naming `player` when JWT auth is
    /// configured, otherwise the ticket issued at join.
    pub fn authenticate(
        &self,
        player: &PlayerId,
        credential: &str,
        auth: &AuthConfig,
    ) -> Result<(), RejectReason> {
        if auth.is_configured() {
            return authenticate_player(credential, *player, auth)
                .map(|_| ())
                .map_err(|e| RejectReason::Unauthenticated(e.to_string()));
        }
        if credential == self.issue_rejoin_ticket(player) {
            Ok(())
        } else {
            Err(RejectReason::Unauthenticated("invalid rejoin ticket".into()))
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    pub fn mark_disconnected(&mut self, player: PlayerId, now: Instant) {
        self.disconnected.entry(player).or_insert(now);
    }

    pub fn mark_connected(&mut self, player: &PlayerId) {
        self.disconnected.remove(player);
    }

    pub fn disconnected_since(&self, player: &PlayerId) -> Option<Instant> {
        self.disconnected.get(player).copied()
    }

    /// A player may rejoin while inside the reconnection window.
    pub fn check_reconnect_window(&self, player: &PlayerId, now: Instant) -> Result<(), RejectReason> {
        match self.disconnected.get(player) {
            Some(since) if now.saturating_duration_since(*since) > self.reconnect_window => {
                Err(RejectReason::ReconnectWindowExpired)
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // REACHABILITY
    // =========================================================================

    /// The authority stopped answering. Idempotent.
    pub fn authority_unreachable(&mut self, now: Instant) {
        if self.status.is_terminated() {
            return;
        }
        self.unreachable_since.get_or_insert(now);
        self.status = SessionStatus::Suspended;
    }

    /// The authority answered again before the grace period ran out.
    pub fn authority_restored(&mut self) {
        if self.status == SessionStatus::Suspended {
            self.status = SessionStatus::Active;
        }
        self.unreachable_since = None;
    }

    /// Terminate when the grace period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Result<(), EngineError> {
        if let SessionStatus::Terminated { ref reason } = self.status {
            if reason == AUTHORITY_LOST {
                return Err(EngineError::AuthorityLost);
            }
            return Ok(());
        }
        match self.unreachable_since {
            Some(since) if now.saturating_duration_since(since) >= self.grace_period => {
                self.terminate(AUTHORITY_LOST);
                Err(EngineError::AuthorityLost)
            }
            _ => Ok(()),
        }
    }

    /// Moment the grace period runs out, while suspended.
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.unreachable_since.map(|since| since + self.grace_period)
    }

    pub fn terminate(&mut self, reason: &str) {
        if !self.status.is_terminated() {
            self.status = SessionStatus::Terminated { reason: reason.into() };
        }
    }
}

/// Termination reason used when the grace period expires.
pub const AUTHORITY_LOST: &str = "authority lost";

impl Lifecycle for SessionAuthority {
    fn start(&mut self, _ctx: &SessionContext) -> Result<(), EngineError> {
        match self.status {
            SessionStatus::Pending => {
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::Active => Ok(()),
            _ => Err(EngineError::SessionNotActive),
        }
    }

    fn stop(&mut self, _ctx: &SessionContext) {
        self.terminate("stopped");
    }
}

// =============================================================================
// TESTS
// =============================================================================
