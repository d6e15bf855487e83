//! The one mutable record shared by the log tail, the gRPC callbacks and the
//! debug HTTP handlers.
//!
//! Every method takes the lock, copies out what the caller needs and releases
//! it before returning. Callers make outbound agent calls with the copies, so
//! a slow agent never holds up log processing or other callbacks.

use std::sync::Arc;

use chrono::Utc;
use stk_session::{
    GameSessionDescriptor, GameSessionId, PlayerSessionId, SessionError, SessionStatus,
    TerminationRequest,
};
use tokio::sync::Mutex;

#[derive(Debug)]
struct SessionRecord {
    session: Option<GameSessionDescriptor>,
    healthy: bool,
    termination: Option<TerminationRequest>,
}

/// Outcome of a session-start command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// Stored as Activating; the caller must activate it with the agent.
    Activate { id: GameSessionId, max_players: u32 },
    /// Same session is already Active.
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoin {
    pub session_id: GameSessionId,
    /// False when the player was already present.
    pub added: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationStart {
    /// First request. Carries the session (if any) that must be terminated.
    Begun { session_id: Option<GameSessionId> },
    AlreadyRequested,
}

#[derive(Clone, Debug)]
pub struct SessionState {
    inner: Arc<Mutex<SessionRecord>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionRecord {
                session: None,
                healthy: true,
                termination: None,
            })),
        }
    }

    pub async fn healthy(&self) -> bool {
        self.inner.lock().await.healthy
    }

    pub async fn set_healthy(&self, healthy: bool) {
        self.inner.lock().await.healthy = healthy;
    }

    /// A different session while one is live is rejected; the same id is
    /// re-activated while still Activating and acknowledged once Active.
    pub async fn begin_session(
        &self,
        id: GameSessionId,
        max_players: u32,
    ) -> Result<SessionStart, SessionError> {
        let mut rec = self.inner.lock().await;

        if let Some(cur) = &rec.session {
            if cur.status.is_closed() {
                return Err(SessionError::Closed {
                    id: cur.id.clone(),
                    status: cur.status,
                });
            }
            if cur.id != id {
                return Err(SessionError::AlreadyLive {
                    live: cur.id.clone(),
                    status: cur.status,
                });
            }
            if cur.status == SessionStatus::Active {
                return Ok(SessionStart::AlreadyActive);
            }
            return Ok(SessionStart::Activate {
                id,
                max_players: cur.max_players,
            });
        }
        if rec.termination.is_some() {
            return Err(SessionError::Closed {
                id,
                status: SessionStatus::Terminating,
            });
        }

        rec.session = Some(GameSessionDescriptor::new(id.clone(), max_players));
        Ok(SessionStart::Activate { id, max_players })
    }

    /// Activating → Active, unless the session was replaced or already moved on.
    pub async fn mark_active(&self, id: &GameSessionId) -> bool {
        let mut rec = self.inner.lock().await;
        match rec.session.as_mut() {
            Some(s) if &s.id == id && s.status == SessionStatus::Activating => {
                s.advance(SessionStatus::Active)
            }
            _ => false,
        }
    }

    pub async fn current_session_id(&self) -> Result<GameSessionId, SessionError> {
        let rec = self.inner.lock().await;
        rec.session
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or(SessionError::NoSession)
    }

    pub async fn add_player(&self, player: PlayerSessionId) -> Result<PlayerJoin, SessionError> {
        let mut rec = self.inner.lock().await;
        let session = rec.session.as_mut().ok_or(SessionError::NoSession)?;
        let added = session.add_player(player, Utc::now())?;
        Ok(PlayerJoin {
            session_id: session.id.clone(),
            added,
        })
    }

    pub async fn remove_player(&self, player: &PlayerSessionId) -> Result<GameSessionId, SessionError> {
        let mut rec = self.inner.lock().await;
        let session = rec.session.as_mut().ok_or(SessionError::NoSession)?;
        session.remove_player(player)?;
        Ok(session.id.clone())
    }

    /// Moves the session to Terminating (no-op if already further along).
    pub async fn terminate_session(&self) -> Result<GameSessionId, SessionError> {
        let mut rec = self.inner.lock().await;
        let session = rec.session.as_mut().ok_or(SessionError::NoSession)?;
        session.advance(SessionStatus::Terminating);
        Ok(session.id.clone())
    }

    /// Records the termination request once and moves any session to Terminating.
    pub async fn record_termination(&self, request: TerminationRequest) -> TerminationStart {
        let mut rec = self.inner.lock().await;
        if rec.termination.is_some() {
            return TerminationStart::AlreadyRequested;
        }
        rec.termination = Some(request);
        let session_id = rec.session.as_mut().map(|s| {
            s.advance(SessionStatus::Terminating);
            s.id.clone()
        });
        TerminationStart::Begun { session_id }
    }

    /// Moves any session to Terminated. Safe with no session.
    pub async fn finish_termination(&self) {
        let mut rec = self.inner.lock().await;
        if let Some(s) = rec.session.as_mut() {
            s.advance(SessionStatus::Terminated);
        }
    }

    pub async fn termination(&self) -> Option<TerminationRequest> {
        self.inner.lock().await.termination.clone()
    }

    pub async fn snapshot(&self) -> Option<GameSessionDescriptor> {
        self.inner.lock().await.session.clone()
    }
}
