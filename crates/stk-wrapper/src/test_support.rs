//! In-process stand-in for the GSE agent.

use std::{collections::HashMap, sync::Arc, time::Duration};

use stk_proto::grpcsdk::HealthCheckRequest;
use stk_proto::grpcsdk::game_server_grpc_sdk_service_client::GameServerGrpcSdkServiceClient;
use stk_proto::grpcsdk::gse_grpc_sdk_service_server::{GseGrpcSdkService, GseGrpcSdkServiceServer};
use stk_proto::grpcsdk::{
    AcceptPlayerSessionRequest, ActivateGameServerSessionRequest, AuxProxyResponse,
    DescribePlayerSessionsRequest, DescribePlayerSessionsResponse, PlayerSession,
    ProcessEndingRequest, ProcessReadyRequest, RemovePlayerSessionRequest, ReportCustomDataRequest,
    TerminateGameServerSessionRequest, UpdatePlayerSessionCreationPolicyRequest,
};
use tokio::sync::Mutex;
use tonic::{Code, Request, Response, Status, transport::Server, transport::server::TcpIncoming};

use crate::agent_client::AgentClient;
use crate::context::AppContext;
use crate::session_state::SessionState;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub pid: Option<String>,
    pub request_id: Option<String>,
    /// Session/player ids or other arguments, joined with '/'.
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct FakeAgent {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failures: Arc<Mutex<HashMap<&'static str, (Code, String)>>>,
    dial_callback: Arc<Mutex<bool>>,
    callback_health: Arc<Mutex<Option<Result<bool, String>>>>,
}

impl FakeAgent {
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().await.iter().map(|c| c.method).collect()
    }

    pub async fn fail(&self, method: &'static str, code: Code, message: &str) {
        self.failures
            .lock()
            .await
            .insert(method, (code, message.to_string()));
    }

    /// On ProcessReady, health-check the announced callback port before
    /// answering, the way the agent does.
    pub async fn dial_callback_on_ready(&self) {
        *self.dial_callback.lock().await = true;
    }

    pub async fn callback_health(&self) -> Option<Result<bool, String>> {
        self.callback_health.lock().await.clone()
    }

    async fn check_callback(&self, grpc_port: i32) {
        let endpoint = format!("http://127.0.0.1:{grpc_port}");
        let outcome = match GameServerGrpcSdkServiceClient::connect(endpoint).await {
            Ok(mut client) => client
                .on_health_check(HealthCheckRequest {})
                .await
                .map(|r| r.into_inner().health_status)
                .map_err(|s| s.to_string()),
            Err(e) => Err(e.to_string()),
        };
        *self.callback_health.lock().await = Some(outcome);
    }

    async fn record<T>(
        &self,
        method: &'static str,
        request: &Request<T>,
        detail: String,
    ) -> Result<(), Status> {
        let meta = request.metadata();
        let get = |k: &str| {
            meta.get(k)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.calls.lock().await.push(RecordedCall {
            method,
            pid: get("pid"),
            request_id: get("requestid"),
            detail,
        });
        match self.failures.lock().await.get(method) {
            Some((code, msg)) => Err(Status::new(*code, msg.clone())),
            None => Ok(()),
        }
    }

    /// Serves the fake on an ephemeral localhost port and returns its endpoint.
    pub async fn serve(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
        let svc = GseGrpcSdkServiceServer::new(self.clone());
        tokio::spawn(async move {
            Server::builder()
                .add_service(svc)
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }
}

fn ack() -> Result<Response<AuxProxyResponse>, Status> {
    Ok(Response::new(AuxProxyResponse {}))
}

#[tonic::async_trait]
impl GseGrpcSdkService for FakeAgent {
    async fn process_ready(
        &self,
        request: Request<ProcessReadyRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!("{}/{}/{}", r.log_paths_to_upload.join(","), r.client_port, r.grpc_port);
        let grpc_port = r.grpc_port;
        self.record("ProcessReady", &request, detail).await?;
        if *self.dial_callback.lock().await {
            self.check_callback(grpc_port).await;
        }
        ack()
    }

    async fn activate_game_server_session(
        &self,
        request: Request<ActivateGameServerSessionRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!("{}/{}", r.game_server_session_id, r.max_players);
        self.record("ActivateGameServerSession", &request, detail).await?;
        ack()
    }

    async fn accept_player_session(
        &self,
        request: Request<AcceptPlayerSessionRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!("{}/{}", r.game_server_session_id, r.player_session_id);
        self.record("AcceptPlayerSession", &request, detail).await?;
        ack()
    }

    async fn remove_player_session(
        &self,
        request: Request<RemovePlayerSessionRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!("{}/{}", r.game_server_session_id, r.player_session_id);
        self.record("RemovePlayerSession", &request, detail).await?;
        ack()
    }

    async fn terminate_game_server_session(
        &self,
        request: Request<TerminateGameServerSessionRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let detail = request.get_ref().game_server_session_id.clone();
        self.record("TerminateGameServerSession", &request, detail).await?;
        ack()
    }

    async fn process_ending(
        &self,
        request: Request<ProcessEndingRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        self.record("ProcessEnding", &request, String::new()).await?;
        ack()
    }

    async fn describe_player_sessions(
        &self,
        request: Request<DescribePlayerSessionsRequest>,
    ) -> Result<Response<DescribePlayerSessionsResponse>, Status> {
        let r = request.get_ref().clone();
        let detail = format!("{}/{}/{}", r.game_server_session_id, r.player_session_status_filter, r.limit);
        self.record("DescribePlayerSessions", &request, detail).await?;
        Ok(Response::new(DescribePlayerSessionsResponse {
            player_sessions: vec![PlayerSession {
                player_session_id: "psess-1".to_string(),
                player_id: r.player_id,
                game_server_session_id: r.game_server_session_id,
                status: "ACTIVE".to_string(),
                creation_time: 1_700_000_000,
                port: 2759,
                ..Default::default()
            }],
            next_token: "page-2".to_string(),
        }))
    }

    async fn update_player_session_creation_policy(
        &self,
        request: Request<UpdatePlayerSessionCreationPolicyRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!(
            "{}/{}",
            r.game_server_session_id, r.new_player_session_creation_policy
        );
        self.record("UpdatePlayerSessionCreationPolicy", &request, detail).await?;
        ack()
    }

    async fn report_custom_data(
        &self,
        request: Request<ReportCustomDataRequest>,
    ) -> Result<Response<AuxProxyResponse>, Status> {
        let r = request.get_ref();
        let detail = format!("{}/{}", r.current_custom_count, r.max_custom_count);
        self.record("ReportCustomData", &request, detail).await?;
        ack()
    }
}

/// A context wired to a fresh fake agent that has already been told the
/// process is ready.
pub async fn ready_context(player_tracking: bool) -> (AppContext, FakeAgent) {
    let fake = FakeAgent::default();
    let endpoint = fake.serve().await;
    let agent = AgentClient::new(&endpoint, Duration::from_secs(2)).unwrap();
    agent
        .process_ready(vec!["/local/game/log/log.txt".to_string()], 20000, 30000)
        .await
        .unwrap();
    let ctx = AppContext {
        session: SessionState::new(),
        agent,
        shutdown: Shutdown::new(),
        player_tracking,
    };
    (ctx, fake)
}
