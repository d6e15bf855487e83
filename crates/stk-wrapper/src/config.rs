use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

/// Where SuperTuxKart writes its server log, relative to `$HOME`.
pub const DEFAULT_GAME_LOG: &str = ".config/supertuxkart/config-0.10/server_config.log";
pub const DEFAULT_UPLOAD_LOG_PATH: &str = "/local/game/log/log.txt";
pub const DEFAULT_AGENT_ENDPOINT: &str = "http://127.0.0.1:5758";
pub const DEFAULT_DEBUG_HTTP_ADDR: &str = "127.0.0.1:0";

#[derive(Debug, Clone, Parser)]
#[command(name = "stk-wrapper", version, about = "GSE sidecar for a SuperTuxKart dedicated server")]
pub struct Args {
    /// The command and arguments to execute the server binary.
    #[arg(short = 'i', long = "input")]
    pub input: String,

    /// Forward player joins/leaves to the agent. When off they are only logged.
    #[arg(long)]
    pub player_tracking: bool,

    #[arg(long, default_value = DEFAULT_AGENT_ENDPOINT)]
    pub agent_endpoint: String,

    /// Game log to follow. Defaults to the SuperTuxKart server log under `$HOME`.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log paths reported to the agent in ProcessReady.
    #[arg(long = "upload-log-path", default_value = DEFAULT_UPLOAD_LOG_PATH)]
    pub upload_log_paths: Vec<String>,

    /// Game client port; 0 picks a free ephemeral port.
    #[arg(long, default_value_t = 0)]
    pub client_port: u16,

    /// Debug HTTP listener. Unauthenticated, so loopback unless overridden.
    #[arg(long, default_value = DEFAULT_DEBUG_HTTP_ADDR)]
    pub debug_http_addr: SocketAddr,

    /// Also write wrapper logs to `<dir>/wrapper.log`.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    pub fn game_log_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(p) = &self.log_file {
            return Ok(p.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("could not get home dir"))?;
        Ok(home.join(DEFAULT_GAME_LOG))
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub fn log_open_attempts() -> u32 {
    env_u64("STK_LOG_OPEN_ATTEMPTS")
        .map(|v| v.clamp(1, 120) as u32)
        .unwrap_or(10)
}

pub fn log_open_interval() -> Duration {
    Duration::from_millis(
        env_u64("STK_LOG_OPEN_INTERVAL_MS")
            .map(|v| v.clamp(100, 60_000))
            .unwrap_or(1000),
    )
}

pub fn agent_timeout() -> Duration {
    Duration::from_millis(
        env_u64("STK_AGENT_TIMEOUT_MS")
            .map(|v| v.clamp(500, 60_000))
            .unwrap_or(5000),
    )
}

pub fn shutdown_grace() -> Duration {
    Duration::from_millis(
        env_u64("STK_SHUTDOWN_GRACE_MS")
            .map(|v| v.clamp(0, 30_000))
            .unwrap_or(3000),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_launcher_flag_shape() {
        let args = Args::try_parse_from([
            "stk-wrapper",
            "-i",
            "/usr/games/supertuxkart --server-config=/cfg.xml",
            "--player-tracking",
        ])
        .unwrap();
        assert_eq!(args.input, "/usr/games/supertuxkart --server-config=/cfg.xml");
        assert!(args.player_tracking);
        assert_eq!(args.agent_endpoint, DEFAULT_AGENT_ENDPOINT);
        assert_eq!(args.upload_log_paths, vec![DEFAULT_UPLOAD_LOG_PATH.to_string()]);
        assert_eq!(args.client_port, 0);
    }

    #[test]
    fn debug_http_defaults_to_loopback() {
        let args = Args::try_parse_from(["stk-wrapper", "-i", "stk"]).unwrap();
        assert!(args.debug_http_addr.ip().is_loopback());
        assert_eq!(args.debug_http_addr.port(), 0);

        let args =
            Args::try_parse_from(["stk-wrapper", "-i", "stk", "--debug-http-addr", "0.0.0.0:8080"])
                .unwrap();
        assert_eq!(args.debug_http_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn input_is_required() {
        assert!(Args::try_parse_from(["stk-wrapper"]).is_err());
    }

    #[test]
    fn explicit_log_file_wins() {
        let args =
            Args::try_parse_from(["stk-wrapper", "-i", "stk", "--log-file", "/tmp/x.log"]).unwrap();
        assert_eq!(args.game_log_path().unwrap(), PathBuf::from("/tmp/x.log"));
    }

    #[test]
    fn repeated_upload_paths() {
        let args = Args::try_parse_from([
            "stk-wrapper",
            "-i",
            "stk",
            "--upload-log-path",
            "/a.log",
            "--upload-log-path",
            "/b.log",
        ])
        .unwrap();
        assert_eq!(args.upload_log_paths, vec!["/a.log", "/b.log"]);
    }
}
