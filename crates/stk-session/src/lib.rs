use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Game server session id as issued by the GSE agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct GameSessionId(pub String);

/// Player session token. Log-derived events use the in-game player name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PlayerSessionId(pub String);

impl fmt::Display for GameSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PlayerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered: a session only ever moves forward through these states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Activating,
    Active,
    Terminating,
    Terminated,
}

impl SessionStatus {
    /// Terminating or Terminated.
    pub fn is_closed(self) -> bool {
        self >= SessionStatus::Terminating
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no game server session has been started")]
    NoSession,
    #[error("player session not found: {0}")]
    PlayerNotFound(PlayerSessionId),
    #[error("game server session {id} is {status:?}")]
    Closed {
        id: GameSessionId,
        status: SessionStatus,
    },
    #[error("game server session {live} is already {status:?}")]
    AlreadyLive {
        live: GameSessionId,
        status: SessionStatus,
    },
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NoSession | SessionError::PlayerNotFound(_))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GameSessionDescriptor {
    pub id: GameSessionId,
    pub max_players: u32,
    pub players: BTreeMap<PlayerSessionId, DateTime<Utc>>,
    pub status: SessionStatus,
}

impl GameSessionDescriptor {
    pub fn new(id: GameSessionId, max_players: u32) -> Self {
        Self {
            id,
            max_players,
            players: BTreeMap::new(),
            status: SessionStatus::Activating,
        }
    }

    /// Moves the status forward. Returns false (and leaves the status alone)
    /// when `next` is not strictly ahead of the current status.
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if next <= self.status {
            return false;
        }
        self.status = next;
        true
    }

    /// Returns `Ok(false)` when the player is already present.
    pub fn add_player(
        &mut self,
        player: PlayerSessionId,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        if self.status.is_closed() {
            return Err(SessionError::Closed {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if self.players.contains_key(&player) {
            return Ok(false);
        }
        self.players.insert(player, joined_at);
        Ok(true)
    }

    pub fn remove_player(&mut self, player: &PlayerSessionId) -> Result<(), SessionError> {
        match self.players.remove(player) {
            Some(_) => Ok(()),
            None => Err(SessionError::PlayerNotFound(player.clone())),
        }
    }
}

/// Recorded once, on the first ProcessTerminate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TerminationRequest {
    /// Raw epoch value delivered by the agent.
    pub deadline_epoch: i64,
    pub reason: String,
}

impl TerminationRequest {
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.deadline_epoch, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> GameSessionDescriptor {
        GameSessionDescriptor::new(GameSessionId("gss-1".to_string()), 8)
    }

    fn player(name: &str) -> PlayerSessionId {
        PlayerSessionId(name.to_string())
    }

    #[test]
    fn new_session_starts_activating() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Activating);
        assert!(s.players.is_empty());
    }

    #[test]
    fn advance_is_monotonic() {
        let mut s = session();
        assert!(s.advance(SessionStatus::Active));
        assert!(s.advance(SessionStatus::Terminating));
        assert!(!s.advance(SessionStatus::Active));
        assert!(!s.advance(SessionStatus::Terminating));
        assert_eq!(s.status, SessionStatus::Terminating);
        assert!(s.advance(SessionStatus::Terminated));
        assert!(!s.advance(SessionStatus::Activating));
        assert_eq!(s.status, SessionStatus::Terminated);
    }

    #[test]
    fn readding_player_is_noop() {
        let mut s = session();
        let t0 = Utc::now();
        assert!(s.add_player(player("alice"), t0).unwrap());
        let later = t0 + chrono::Duration::seconds(5);
        assert!(!s.add_player(player("alice"), later).unwrap());
        assert_eq!(s.players.len(), 1);
        assert_eq!(s.players[&player("alice")], t0);
    }

    #[test]
    fn removing_absent_player_is_not_found() {
        let mut s = session();
        let err = s.remove_player(&player("bob")).unwrap_err();
        assert_eq!(err, SessionError::PlayerNotFound(player("bob")));
        assert!(err.is_not_found());
    }

    #[test]
    fn closed_session_rejects_joins_but_allows_leaves() {
        let mut s = session();
        s.add_player(player("alice"), Utc::now()).unwrap();
        s.advance(SessionStatus::Terminating);

        let err = s.add_player(player("bob"), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::Closed { status: SessionStatus::Terminating, .. }));
        assert!(!err.is_not_found());

        s.remove_player(&player("alice")).unwrap();
        assert!(s.players.is_empty());
        assert_eq!(s.status, SessionStatus::Terminating);
    }

    #[test]
    fn termination_deadline_converts_epoch_seconds() {
        let req = TerminationRequest {
            deadline_epoch: 1_700_000_000,
            reason: "test".to_string(),
        };
        assert_eq!(req.deadline().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn status_serializes_screaming_case() {
        let v = serde_json::to_string(&SessionStatus::Terminating).unwrap();
        assert_eq!(v, "\"TERMINATING\"");
    }
}
