//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM cancel the [`ShutdownToken`] of the current run. The
//! archive scan polls the token between lines and abandons the window once
//! it is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cancellation flag shared between a run and whoever may stop it.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Listens for SIGINT/SIGTERM while alive and cancels its token on receipt.
///
/// Dropping the guard stops listening.
pub struct ShutdownGuard {
    listener: JoinHandle<()>,
}

impl ShutdownGuard {
    /// Start listening for signals on behalf of `token`.
    ///
    /// Must be called from inside a tokio runtime. If no handler can be
    /// registered the guard is still returned and signals keep their
    /// default behaviour.
    pub fn new(token: ShutdownToken) -> Self {
        let listener = tokio::spawn(async move {
            let sigint = register(SignalKind::interrupt(), "SIGINT");
            let sigterm = register(SignalKind::terminate(), "SIGTERM");

            let name = match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => tokio::select! {
                    _ = int.recv() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                },
                (Some(mut int), None) => {
                    int.recv().await;
                    "SIGINT"
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    "SIGTERM"
                }
                (None, None) => {
                    warn!("No signal handlers registered, graceful shutdown disabled");
                    return;
                }
            };
            info!("Received {}, abandoning the current window", name);
            token.cancel();
        });

        Self { listener }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    signal(kind)
        .map_err(|e| warn!("Failed to register {} handler: {}", name, e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_token() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let token = ShutdownToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_leaves_token_alone_without_signal() {
        let token = ShutdownToken::new();
        let guard = ShutdownGuard::new(token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(!token.is_cancelled());
    }
}
