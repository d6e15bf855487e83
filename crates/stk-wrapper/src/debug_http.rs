//! Local HTTP surface for poking the sidecar by hand (curl, browser).
//!
//! Not authenticated and not used by the orchestrator. Every route answers
//! with the same `{code, message, result}` envelope; `code` 0 is success.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stk_session::{GameSessionDescriptor, PlayerSessionId, SessionError};

use crate::agent_client::{AgentError, PlayerSessionCreationPolicy, PlayerSessionFilter};
use crate::context::AppContext;

const SUCCESS: i32 = 0;
const SUCCESS_MSG: &str = "success";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub code: i32,
    pub message: String,
    pub result: Option<Value>,
}

fn ok(result: Option<Value>) -> Json<Envelope> {
    Json(Envelope {
        code: SUCCESS,
        message: SUCCESS_MSG.to_string(),
        result,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest(message.into())
    }

    /// HTTP status plus the envelope code.
    fn codes(&self) -> (StatusCode, i32) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, 400),
            ApiError::Session(e) if e.is_not_found() => (StatusCode::NOT_FOUND, 404),
            ApiError::Session(_) => (StatusCode::CONFLICT, 409),
            ApiError::Agent(e) => match e.status() {
                Some(status) => (StatusCode::BAD_GATEWAY, status.code() as i32),
                None => (StatusCode::INTERNAL_SERVER_ERROR, 500),
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, 500),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (http, code) = self.codes();
        let message = match &self {
            ApiError::Agent(e) => match e.status() {
                Some(status) => status.message().to_string(),
                None => e.to_string(),
            },
            other => other.to_string(),
        };
        tracing::warn!(code, %message, "debug request failed");
        (
            http,
            Json(Envelope {
                code,
                message,
                result: None,
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Envelope>, ApiError>;

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid(format!("{name} cannot be empty")))
}

fn parse_i32(value: Option<String>, name: &str) -> Result<i32, ApiError> {
    required(value, name)?
        .parse::<i32>()
        .map_err(|_| ApiError::invalid(format!("{name} must be an integer")))
}

async fn hello() -> Json<Envelope> {
    Json(Envelope {
        code: SUCCESS,
        message: "hello,world".to_string(),
        result: None,
    })
}

async fn game_server_session(State(ctx): State<AppContext>) -> ApiResult {
    let session: GameSessionDescriptor = ctx.session.snapshot().await.ok_or(SessionError::NoSession)?;
    let value = serde_json::to_value(session).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(ok(Some(value)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerQuery {
    player_session_id: Option<String>,
}

async fn login(State(ctx): State<AppContext>, Query(q): Query<PlayerQuery>) -> ApiResult {
    let player = PlayerSessionId(required(q.player_session_id, "playerSessionId")?);
    let join = ctx.session.add_player(player.clone()).await?;
    ctx.agent
        .accept_player_session(&join.session_id, &player)
        .await?;
    Ok(ok(None))
}

async fn logout(State(ctx): State<AppContext>, Query(q): Query<PlayerQuery>) -> ApiResult {
    let player = PlayerSessionId(required(q.player_session_id, "playerSessionId")?);
    let session_id = ctx.session.remove_player(&player).await?;
    ctx.agent
        .remove_player_session(&session_id, &player)
        .await?;
    Ok(ok(None))
}

async fn terminate_session(State(ctx): State<AppContext>) -> ApiResult {
    let session_id = ctx.session.terminate_session().await?;
    ctx.agent.terminate_game_server_session(&session_id).await?;
    Ok(ok(None))
}

async fn end_process(State(ctx): State<AppContext>) -> ApiResult {
    ctx.agent.process_ending().await?;
    Ok(ok(None))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeQuery {
    game_server_session_id: Option<String>,
    player_id: Option<String>,
    player_session_id: Option<String>,
    player_session_status_filter: Option<String>,
    next_token: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSessionView {
    player_session_id: String,
    player_id: String,
    game_server_session_id: String,
    fleet_id: String,
    ip_address: String,
    dns_name: String,
    port: i32,
    status: String,
    player_data: String,
    creation_time: i64,
    termination_time: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeView {
    player_sessions: Vec<PlayerSessionView>,
    next_token: String,
}

async fn describe_player_sessions(
    State(ctx): State<AppContext>,
    Query(q): Query<DescribeQuery>,
) -> ApiResult {
    let limit = match q.limit.filter(|v| !v.trim().is_empty()) {
        Some(v) => parse_i32(Some(v), "limit")?,
        None => 0,
    };
    let filter = PlayerSessionFilter {
        game_server_session_id: q.game_server_session_id.unwrap_or_default(),
        player_id: q.player_id.unwrap_or_default(),
        player_session_id: q.player_session_id.unwrap_or_default(),
        status_filter: q.player_session_status_filter.unwrap_or_default(),
        next_token: q.next_token.unwrap_or_default(),
        limit,
    };
    let resp = ctx.agent.describe_player_sessions(filter).await?;
    let view = DescribeView {
        player_sessions: resp
            .player_sessions
            .into_iter()
            .map(|p| PlayerSessionView {
                player_session_id: p.player_session_id,
                player_id: p.player_id,
                game_server_session_id: p.game_server_session_id,
                fleet_id: p.fleet_id,
                ip_address: p.ip_address,
                dns_name: p.dns_name,
                port: p.port,
                status: p.status,
                player_data: p.player_data,
                creation_time: p.creation_time,
                termination_time: p.termination_time,
            })
            .collect(),
        next_token: resp.next_token,
    };
    tracing::info!(count = view.player_sessions.len(), "describe player sessions");
    let value = serde_json::to_value(view).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(ok(Some(value)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyQuery {
    new_player_session_creation_policy: Option<String>,
}

async fn update_player_session_policy(
    State(ctx): State<AppContext>,
    Query(q): Query<PolicyQuery>,
) -> ApiResult {
    let policy: PlayerSessionCreationPolicy = required(
        q.new_player_session_creation_policy,
        "newPlayerSessionCreationPolicy",
    )?
    .parse()
    .map_err(ApiError::InvalidRequest)?;
    let session_id = ctx.session.current_session_id().await?;
    ctx.agent
        .update_player_session_creation_policy(&session_id, policy)
        .await?;
    Ok(ok(None))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomDataQuery {
    current_custom_count: Option<String>,
    max_custom_count: Option<String>,
}

async fn report_custom_data(
    State(ctx): State<AppContext>,
    Query(q): Query<CustomDataQuery>,
) -> ApiResult {
    let current = parse_i32(q.current_custom_count, "currentCustomCount")?;
    let max = parse_i32(q.max_custom_count, "maxCustomCount")?;
    ctx.agent.report_custom_data(current, max).await?;
    Ok(ok(None))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthQuery {
    health_status: Option<String>,
}

async fn set_health_status(State(ctx): State<AppContext>, Query(q): Query<HealthQuery>) -> ApiResult {
    let healthy = match required(q.health_status, "healthStatus")?.as_str() {
        "0" => false,
        "1" => true,
        other => return Err(ApiError::invalid(format!("healthStatus must be 0 or 1, got {other}"))),
    };
    ctx.session.set_healthy(healthy).await;
    tracing::info!(healthy, "process health status updated");
    Ok(ok(None))
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/gse/game-server-session", get(game_server_session))
        .route("/gse/login", get(login))
        .route("/gse/logout", get(logout))
        .route("/gse/terminate-game-server-session", get(terminate_session))
        .route("/gse/end-process", get(end_process))
        .route("/gse/describe-player-sessions", get(describe_player_sessions))
        .route("/gse/update-player-session-policy", get(update_player_session_policy))
        .route("/gse/report-custom-data", get(report_custom_data))
        .route("/gse/set-process-health-status", get(set_health_status))
        .with_state(ctx)
}

pub async fn spawn(ctx: AppContext, addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "debug HTTP listening");

    let app = router(ctx);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "debug HTTP server stopped");
        }
    });
    Ok(addr)
}
