use std::net::SocketAddr;

use stk_proto::grpcsdk::game_server_grpc_sdk_service_server::{
    GameServerGrpcSdkService, GameServerGrpcSdkServiceServer,
};
use stk_proto::grpcsdk::{
    HealthCheckRequest, HealthCheckResponse, ProcessResponse, ProcessTerminateRequest,
    StartGameServerSessionRequest,
};
use stk_session::{GameSessionId, SessionError, TerminationRequest};
use tonic::{Request, Response, Status, transport::Server, transport::server::TcpIncoming};

use crate::context::AppContext;
use crate::session_state::{SessionStart, TerminationStart};
use crate::shutdown::ShutdownReason;

fn session_status(e: SessionError) -> Status {
    match e {
        SessionError::NoSession | SessionError::PlayerNotFound(_) => Status::not_found(e.to_string()),
        SessionError::Closed { .. } | SessionError::AlreadyLive { .. } => {
            Status::failed_precondition(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackApi {
    ctx: AppContext,
}

impl CallbackApi {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl GameServerGrpcSdkService for CallbackApi {
    async fn on_health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            health_status: self.ctx.session.healthy().await,
        }))
    }

    async fn on_start_game_server_session(
        &self,
        request: Request<StartGameServerSessionRequest>,
    ) -> Result<Response<ProcessResponse>, Status> {
        let session = request
            .into_inner()
            .game_server_session
            .ok_or_else(|| Status::invalid_argument("game_server_session is required"))?;
        if session.game_server_session_id.trim().is_empty() {
            return Err(Status::invalid_argument("game_server_session_id cannot be empty"));
        }
        let max_players = u32::try_from(session.max_players)
            .map_err(|_| Status::invalid_argument("max_players cannot be negative"))?;
        let id = GameSessionId(session.game_server_session_id);
        tracing::info!(session_id = %id, max_players, "start game server session");

        let (id, max_players) = match self
            .ctx
            .session
            .begin_session(id, max_players)
            .await
            .map_err(session_status)?
        {
            SessionStart::Activate { id, max_players } => (id, max_players),
            SessionStart::AlreadyActive => return Ok(Response::new(ProcessResponse {})),
        };

        self.ctx
            .agent
            .activate_game_server_session(&id, max_players)
            .await
            .map_err(|e| match e.status() {
                Some(status) => Status::new(status.code(), status.message().to_string()),
                None => Status::unavailable(e.to_string()),
            })?;

        if !self.ctx.session.mark_active(&id).await {
            tracing::warn!(session_id = %id, "session moved on before activation completed");
        }
        Ok(Response::new(ProcessResponse {}))
    }

    /// Acknowledges only after shutdown has been requested; the process exit
    /// is what the agent waits for.
    async fn on_process_terminate(
        &self,
        request: Request<ProcessTerminateRequest>,
    ) -> Result<Response<ProcessResponse>, Status> {
        let deadline_epoch = request.into_inner().termination_time;
        let termination = TerminationRequest {
            deadline_epoch,
            reason: "agent requested process termination".to_string(),
        };
        match termination.deadline() {
            Some(at) if at < chrono::Utc::now() => {
                tracing::warn!(deadline = %at, "termination deadline already passed");
            }
            at => tracing::info!(deadline = ?at, "process terminate requested"),
        }

        let session_id = match self.ctx.session.record_termination(termination).await {
            TerminationStart::Begun { session_id } => session_id,
            TerminationStart::AlreadyRequested => {
                tracing::info!("process terminate already in progress");
                // Same contract as the first call: no ack before shutdown starts.
                self.ctx.shutdown.wait().await;
                return Ok(Response::new(ProcessResponse {}));
            }
        };

        if let Some(id) = &session_id {
            if let Err(e) = self.ctx.agent.terminate_game_server_session(id).await {
                tracing::warn!(session_id = %id, error = %e, "terminate game server session failed");
            }
        }
        self.ctx.session.finish_termination().await;

        if let Err(e) = self.ctx.agent.process_ending().await {
            tracing::warn!(error = %e, "process ending failed");
        }
        self.ctx.shutdown.trigger(ShutdownReason::ProcessTerminated);
        Ok(Response::new(ProcessResponse {}))
    }
}

pub fn server(ctx: AppContext) -> GameServerGrpcSdkServiceServer<CallbackApi> {
    GameServerGrpcSdkServiceServer::new(CallbackApi::new(ctx))
}

/// Binds the callback port on localhost so it can be announced in
/// ProcessReady, then serves in the background.
pub async fn spawn(ctx: AppContext) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    tracing::info!(%addr, "callback gRPC listening");

    let svc = server(ctx);
    tokio::spawn(async move {
        if let Err(e) = Server::builder()
            .add_service(svc)
            .serve_with_incoming(incoming)
            .await
        {
            tracing::error!(error = %e, "callback gRPC server stopped");
        }
    });
    Ok(addr)
}
