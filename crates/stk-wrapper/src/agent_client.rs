use std::{future::Future, str::FromStr, sync::Arc, time::Duration};

use stk_proto::grpcsdk::gse_grpc_sdk_service_client::GseGrpcSdkServiceClient;
use stk_proto::grpcsdk::{
    AcceptPlayerSessionRequest, ActivateGameServerSessionRequest, DescribePlayerSessionsRequest,
    DescribePlayerSessionsResponse, ProcessEndingRequest, ProcessReadyRequest,
    RemovePlayerSessionRequest, ReportCustomDataRequest, TerminateGameServerSessionRequest,
    UpdatePlayerSessionCreationPolicyRequest,
};
use stk_session::{GameSessionId, PlayerSessionId};
use tokio::sync::watch;
use tonic::{
    Request, Response, Status,
    metadata::{Ascii, MetadataValue},
    transport::{Channel, Endpoint},
};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid agent endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),
    #[error("process readiness was already reported")]
    AlreadyReported,
    #[error("process readiness has not been reported to the agent")]
    NotReady,
    #[error("invalid request metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),
    #[error("agent {method} failed: {}", .status.message())]
    Rpc {
        method: &'static str,
        status: Status,
    },
}

impl AgentError {
    /// The agent's status, when the failure came from the agent call itself.
    pub fn status(&self) -> Option<&Status> {
        match self {
            AgentError::Rpc { status, .. } => Some(status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Reporting,
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSessionCreationPolicy {
    AcceptAll,
    DenyAll,
}

impl PlayerSessionCreationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerSessionCreationPolicy::AcceptAll => "ACCEPT_ALL",
            PlayerSessionCreationPolicy::DenyAll => "DENY_ALL",
        }
    }
}

impl FromStr for PlayerSessionCreationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT_ALL" => Ok(PlayerSessionCreationPolicy::AcceptAll),
            "DENY_ALL" => Ok(PlayerSessionCreationPolicy::DenyAll),
            other => Err(format!("unknown player session creation policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSessionFilter {
    pub game_server_session_id: String,
    pub player_id: String,
    pub player_session_id: String,
    pub status_filter: String,
    pub next_token: String,
    pub limit: i32,
}

/// Outbound client for the local GSE agent.
///
/// `process_ready` goes out exactly once. Every other call waits (bounded by
/// the call timeout) until it has been acknowledged, so nothing reaches the
/// agent ahead of the readiness report.
#[derive(Debug, Clone)]
pub struct AgentClient {
    inner: GseGrpcSdkServiceClient<Channel>,
    pid: MetadataValue<Ascii>,
    timeout: Duration,
    readiness: Arc<watch::Sender<Readiness>>,
}

impl AgentClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AgentError> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        let (readiness, _rx) = watch::channel(Readiness::Pending);
        Ok(Self {
            inner: GseGrpcSdkServiceClient::new(channel),
            pid: MetadataValue::from(std::process::id()),
            timeout,
            readiness: Arc::new(readiness),
        })
    }

    async fn wait_ready(&self) -> Result<(), AgentError> {
        let mut rx = self.readiness.subscribe();
        let reported = tokio::time::timeout(self.timeout, rx.wait_for(|r| *r == Readiness::Reported))
            .await
            .is_ok_and(|r| r.is_ok());
        if !reported {
            return Err(AgentError::NotReady);
        }
        Ok(())
    }

    async fn call<Req, Resp, Fut>(
        &self,
        method: &'static str,
        message: Req,
        rpc: impl FnOnce(GseGrpcSdkServiceClient<Channel>, Request<Req>) -> Fut,
    ) -> Result<Resp, AgentError>
    where
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut request = Request::new(message);
        request.set_timeout(self.timeout);
        request.metadata_mut().insert("pid", self.pid.clone());
        request
            .metadata_mut()
            .insert("requestid", MetadataValue::try_from(request_id.as_str())?);

        tracing::info!(method, %request_id, "calling agent");
        match rpc(self.inner.clone(), request).await {
            Ok(resp) => Ok(resp.into_inner()),
            Err(status) => {
                tracing::warn!(method, %request_id, code = ?status.code(), message = status.message(), "agent call failed");
                Err(AgentError::Rpc { method, status })
            }
        }
    }

    pub async fn process_ready(
        &self,
        log_paths: Vec<String>,
        client_port: u16,
        grpc_port: u16,
    ) -> Result<(), AgentError> {
        let claimed = self.readiness.send_if_modified(|r| {
            if *r != Readiness::Pending {
                return false;
            }
            *r = Readiness::Reporting;
            true
        });
        if !claimed {
            return Err(AgentError::AlreadyReported);
        }

        let req = ProcessReadyRequest {
            log_paths_to_upload: log_paths,
            client_port: i32::from(client_port),
            grpc_port: i32::from(grpc_port),
        };
        self.call("ProcessReady", req, |mut c, r| async move { c.process_ready(r).await })
            .await?;

        self.readiness.send_replace(Readiness::Reported);
        tracing::info!(client_port, grpc_port, "process readiness reported");
        Ok(())
    }

    pub async fn activate_game_server_session(
        &self,
        session_id: &GameSessionId,
        max_players: u32,
    ) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = ActivateGameServerSessionRequest {
            game_server_session_id: session_id.0.clone(),
            max_players: i32::try_from(max_players).unwrap_or(i32::MAX),
        };
        self.call("ActivateGameServerSession", req, |mut c, r| async move {
            c.activate_game_server_session(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn accept_player_session(
        &self,
        session_id: &GameSessionId,
        player: &PlayerSessionId,
    ) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = AcceptPlayerSessionRequest {
            game_server_session_id: session_id.0.clone(),
            player_session_id: player.0.clone(),
        };
        self.call("AcceptPlayerSession", req, |mut c, r| async move {
            c.accept_player_session(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn remove_player_session(
        &self,
        session_id: &GameSessionId,
        player: &PlayerSessionId,
    ) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = RemovePlayerSessionRequest {
            game_server_session_id: session_id.0.clone(),
            player_session_id: player.0.clone(),
        };
        self.call("RemovePlayerSession", req, |mut c, r| async move {
            c.remove_player_session(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn terminate_game_server_session(
        &self,
        session_id: &GameSessionId,
    ) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = TerminateGameServerSessionRequest {
            game_server_session_id: session_id.0.clone(),
        };
        self.call("TerminateGameServerSession", req, |mut c, r| async move {
            c.terminate_game_server_session(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn process_ending(&self) -> Result<(), AgentError> {
        self.wait_ready().await?;
        self.call("ProcessEnding", ProcessEndingRequest {}, |mut c, r| async move {
            c.process_ending(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn describe_player_sessions(
        &self,
        filter: PlayerSessionFilter,
    ) -> Result<DescribePlayerSessionsResponse, AgentError> {
        self.wait_ready().await?;
        let req = DescribePlayerSessionsRequest {
            game_server_session_id: filter.game_server_session_id,
            player_id: filter.player_id,
            player_session_id: filter.player_session_id,
            player_session_status_filter: filter.status_filter,
            next_token: filter.next_token,
            limit: filter.limit,
        };
        self.call("DescribePlayerSessions", req, |mut c, r| async move {
            c.describe_player_sessions(r).await
        })
        .await
    }

    pub async fn update_player_session_creation_policy(
        &self,
        session_id: &GameSessionId,
        policy: PlayerSessionCreationPolicy,
    ) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = UpdatePlayerSessionCreationPolicyRequest {
            game_server_session_id: session_id.0.clone(),
            new_player_session_creation_policy: policy.as_str().to_string(),
        };
        self.call("UpdatePlayerSessionCreationPolicy", req, |mut c, r| async move {
            c.update_player_session_creation_policy(r).await
        })
        .await?;
        Ok(())
    }

    pub async fn report_custom_data(&self, current: i32, max: i32) -> Result<(), AgentError> {
        self.wait_ready().await?;
        let req = ReportCustomDataRequest {
            current_custom_count: current,
            max_custom_count: max,
        };
        self.call("ReportCustomData", req, |mut c, r| async move {
            c.report_custom_data(r).await
        })
        .await?;
        Ok(())
    }
}
