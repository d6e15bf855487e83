use crate::agent_client::AgentClient;
use crate::session_state::SessionState;
use crate::shutdown::Shutdown;

/// Built once in `main` and cloned into the tail loop and both servers.
#[derive(Clone, Debug)]
pub struct AppContext {
    pub session: SessionState,
    pub agent: AgentClient,
    pub shutdown: Shutdown,
    pub player_tracking: bool,
}
