use std::{net::SocketAddr, path::PathBuf, process::Stdio, time::Duration};

use stk_session::PlayerSessionId;
use tokio::{process::Command, sync::watch};

use crate::config::{self, Args};
use crate::context::AppContext;
use crate::{callback_service, debug_http};
use crate::error::WrapperError;
use crate::log_classifier::{LifecycleEvent, classify};
use crate::log_tail::LogTail;
use crate::port_alloc::{self, PortError};
use crate::shutdown::ShutdownReason;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("empty server command line")]
    EmptyCommand,
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("spawn {exec}: {source}")]
    Spawn {
        exec: String,
        #[source]
        source: std::io::Error,
    },
}

/// Splits the `-i` command line and appends the injected client port.
pub fn build_command_line(input: &str, port: u16) -> Result<(String, Vec<String>), LaunchError> {
    let mut parts = input.split_whitespace().map(str::to_string);
    let exec = parts.next().ok_or(LaunchError::EmptyCommand)?;
    let mut args: Vec<String> = parts.collect();
    args.push(format!("--port={port}"));
    Ok((exec, args))
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // The game must not outlive the sidecar.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug)]
pub struct GameProcess {
    pub pid: Option<u32>,
    pub client_port: u16,
    /// Flips to true once the child has exited.
    pub exited: watch::Receiver<bool>,
}

/// Spawns the game server with inherited stdout/stderr. The child handle is
/// moved into a wait task; only its exit is observable afterwards.
pub fn launch(input: &str, preferred_port: u16) -> Result<GameProcess, LaunchError> {
    let client_port = port_alloc::allocate_tcp_port(preferred_port)?;
    let (exec, args) = build_command_line(input, client_port)?;
    tracing::info!(%exec, ?args, "starting game server");

    let mut cmd = Command::new(&exec);
    cmd.args(&args).stdout(Stdio::inherit()).stderr(Stdio::inherit());
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(set_parent_death_signal);
    }

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        exec: exec.clone(),
        source,
    })?;
    let pid = child.id();
    tracing::info!(?pid, client_port, "game server started");

    let (tx, exited) = watch::channel(false);
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::info!(%status, "game server exited"),
            Err(e) => tracing::error!(error = %e, "waiting for game server failed"),
        }
        tx.send_replace(true);
    });

    Ok(GameProcess {
        pid,
        client_port,
        exited,
    })
}

async fn player_joined(ctx: &AppContext, name: String) {
    let player = PlayerSessionId(name);
    let join = match ctx.session.add_player(player.clone()).await {
        Ok(j) => j,
        Err(e) if e.is_not_found() => {
            tracing::info!(%player, "player joined before any game server session; not tracked");
            return;
        }
        Err(e) => {
            tracing::warn!(%player, error = %e, "ignoring player join");
            return;
        }
    };
    if !join.added {
        tracing::debug!(%player, "player already tracked");
        return;
    }
    if !ctx.player_tracking {
        tracing::info!(%player, "player joined (tracking disabled)");
        return;
    }
    if let Err(e) = ctx.agent.accept_player_session(&join.session_id, &player).await {
        tracing::warn!(%player, error = %e, "accept player session failed");
    }
}

async fn player_left(ctx: &AppContext, name: String) {
    let player = PlayerSessionId(name);
    let session_id = match ctx.session.remove_player(&player).await {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(%player, error = %e, "player left but was not tracked");
            return;
        }
    };
    if !ctx.player_tracking {
        tracing::info!(%player, "player left (tracking disabled)");
        return;
    }
    if let Err(e) = ctx.agent.remove_player_session(&session_id, &player).await {
        tracing::warn!(%player, error = %e, "remove player session failed");
    }
}

pub async fn apply_event(ctx: &AppContext, event: LifecycleEvent) {
    match event {
        LifecycleEvent::Ready => {
            tracing::info!("game server is listening");
        }
        LifecycleEvent::PlayerJoined { name: None } | LifecycleEvent::PlayerLeft { name: None } => {
            tracing::warn!(?event, "could not determine player");
        }
        LifecycleEvent::PlayerJoined { name: Some(name) } => player_joined(ctx, name).await,
        LifecycleEvent::PlayerLeft { name: Some(name) } => player_left(ctx, name).await,
        LifecycleEvent::NoPlayersRemain => {
            tracing::info!("server has no more players; shutting down");
            ctx.session.finish_termination().await;
            ctx.shutdown.trigger(ShutdownReason::NoPlayersRemain);
        }
    }
}

/// Echoes and classifies every log line until shutdown is requested. A stream
/// that ends first means the game died on its own.
pub async fn follow_log(ctx: &AppContext, mut tail: LogTail) -> Result<(), WrapperError> {
    while let Some(line) = tail.next_line().await? {
        // Game lines go out untouched, interleaved with our own logs.
        println!("{line}");
        if let Some(event) = classify(&line) {
            apply_event(ctx, event).await;
        }
        if ctx.shutdown.requested().is_some() {
            return Ok(());
        }
    }
    if ctx.shutdown.requested().is_some() {
        return Ok(());
    }
    Err(WrapperError::UnexpectedChildExit)
}

pub async fn run(
    ctx: AppContext,
    log_path: PathBuf,
    game: GameProcess,
    open_attempts: u32,
    open_interval: Duration,
) -> Result<(), WrapperError> {
    let tail = LogTail::open(log_path, open_attempts, open_interval, game.exited).await?;
    follow_log(&ctx, tail).await
}

/// Everything `startup` leaves running for the tail loop.
#[derive(Debug)]
pub struct Started {
    pub game: GameProcess,
    pub log_path: PathBuf,
    pub rpc_addr: SocketAddr,
}

/// Brings up both listeners, launches the game and only then reports
/// readiness, so the announced callback port is already serving.
pub async fn startup(args: &Args, ctx: &AppContext) -> Result<Started, WrapperError> {
    let log_path = args
        .game_log_path()
        .map_err(|e| WrapperError::LogPath(e.to_string()))?;

    let rpc_addr = callback_service::spawn(ctx.clone())
        .await
        .map_err(|source| WrapperError::Bind { what: "callback gRPC", source })?;
    debug_http::spawn(ctx.clone(), args.debug_http_addr)
        .await
        .map_err(|source| WrapperError::Bind { what: "debug HTTP", source })?;

    let game = launch(&args.input, args.client_port)?;
    tracing::info!(
        pid = game.pid,
        client_port = game.client_port,
        rpc_port = rpc_addr.port(),
        "game server launched"
    );

    ctx.agent
        .process_ready(args.upload_log_paths.clone(), game.client_port, rpc_addr.port())
        .await
        .map_err(WrapperError::AgentUnreachable)?;

    Ok(Started {
        game,
        log_path,
        rpc_addr,
    })
}

/// Startup followed by the tail loop. Ok means shutdown was requested.
pub async fn start(args: Args, ctx: AppContext) -> Result<(), WrapperError> {
    let started = startup(&args, &ctx).await?;
    run(
        ctx,
        started.log_path,
        started.game,
        config::log_open_attempts(),
        config::log_open_interval(),
    )
    .await
}
