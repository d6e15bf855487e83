use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The game log reported zero connected peers.
    NoPlayersRemain,
    /// The agent delivered ProcessTerminate.
    ProcessTerminated,
    /// SIGINT/SIGTERM.
    Signal,
}

impl ShutdownReason {
    pub fn exit_code(self) -> i32 {
        0
    }

    /// How long to wait before exiting so in-flight responses can flush.
    pub fn grace(self, configured: Duration) -> Duration {
        match self {
            ShutdownReason::NoPlayersRemain => Duration::ZERO,
            ShutdownReason::ProcessTerminated | ShutdownReason::Signal => configured,
        }
    }
}

/// Single-shot exit request. The first trigger wins; later ones are ignored.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true if this call initiated shutdown.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let initiated = self.tx.send_if_modified(|cur| {
            if cur.is_some() {
                return false;
            }
            *cur = Some(reason);
            true
        });
        if initiated {
            tracing::info!(?reason, "shutdown requested");
        }
        initiated
    }

    pub fn requested(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives in `self`, so this cannot observe a closed channel.
            if rx.changed().await.is_err() {
                return ShutdownReason::Signal;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_trigger_wins() {
        let s = Shutdown::new();
        assert!(s.requested().is_none());
        assert!(s.trigger(ShutdownReason::ProcessTerminated));
        assert!(!s.trigger(ShutdownReason::NoPlayersRemain));
        assert_eq!(s.requested(), Some(ShutdownReason::ProcessTerminated));
        assert_eq!(s.wait().await, ShutdownReason::ProcessTerminated);
    }

    #[tokio::test]
    async fn wait_wakes_on_trigger_from_clone() {
        let s = Shutdown::new();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait().await })
        };
        tokio::task::yield_now().await;
        s.clone().trigger(ShutdownReason::NoPlayersRemain);
        assert_eq!(waiter.await.unwrap(), ShutdownReason::NoPlayersRemain);
    }

    #[test]
    fn no_players_exits_without_grace() {
        let configured = Duration::from_secs(3);
        assert_eq!(ShutdownReason::NoPlayersRemain.grace(configured), Duration::ZERO);
        assert_eq!(ShutdownReason::Signal.grace(configured), configured);
        assert_eq!(ShutdownReason::NoPlayersRemain.exit_code(), 0);
    }
}
