use crate::agent_client::AgentError;
use crate::log_tail::TailError;
use crate::supervisor::LaunchError;

/// Conditions that end the sidecar with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    #[error("bind {what} listener: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("resolve game log path: {0}")]
    LogPath(String),
    #[error("launch game server: {0}")]
    Launch(#[from] LaunchError),
    #[error("report process ready to agent: {0}")]
    AgentUnreachable(#[source] AgentError),
    #[error("game log: {0}")]
    Tail(#[from] TailError),
    #[error("game server exited without a shutdown trigger")]
    UnexpectedChildExit,
}

impl WrapperError {
    /// Failures before the sidecar ever reached steady state.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            WrapperError::Bind { .. }
                | WrapperError::LogPath(_)
                | WrapperError::Launch(_)
                | WrapperError::AgentUnreachable(_)
                | WrapperError::Tail(TailError::Unavailable { .. })
        )
    }
}
