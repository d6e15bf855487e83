use anyhow::Context;
use clap::Parser;
use stk_wrapper::{
    agent_client::AgentClient,
    config::{self, Args},
    context::AppContext,
    error::WrapperError,
    session_state::SessionState,
    shutdown::{Shutdown, ShutdownReason},
    supervisor,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(args: &Args) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "wrapper.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(stderr).with(file).init();
    guard
}

async fn wait_for_signal(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.trigger(ShutdownReason::Signal);
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("termination signal received");
    shutdown.trigger(ShutdownReason::Signal);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let guard = init_tracing(&args);

    let agent = AgentClient::new(&args.agent_endpoint, config::agent_timeout())
        .with_context(|| format!("agent endpoint {}", args.agent_endpoint))?;
    let ctx = AppContext {
        session: SessionState::new(),
        agent,
        shutdown: Shutdown::new(),
        player_tracking: args.player_tracking,
    };

    tokio::spawn(wait_for_signal(ctx.shutdown.clone()));

    let shutdown = ctx.shutdown.clone();
    let outcome = tokio::select! {
        result = supervisor::start(args, ctx) => match result {
            // `follow_log` only returns Ok once shutdown was triggered.
            Ok(()) => Ok(shutdown.wait().await),
            Err(e) => Err(e),
        },
        reason = shutdown.wait() => Ok(reason),
    };

    match outcome {
        Ok(reason) => {
            let grace = reason.grace(config::shutdown_grace());
            tracing::info!(?reason, grace_ms = grace.as_millis() as u64, "shutting down");
            tokio::time::sleep(grace).await;
            drop(guard);
            std::process::exit(reason.exit_code());
        }
        Err(e) => {
            match &e {
                WrapperError::UnexpectedChildExit => {
                    tracing::error!("game server exited unexpectedly")
                }
                e if e.is_startup_failure() => tracing::error!(error = %e, "sidecar failed to start"),
                e => tracing::error!(error = %e, "sidecar stopped"),
            }
            drop(guard);
            Err(e.into())
        }
    }
}
