//! Termination handling: OS signals and the revoke-and-clear sequence.

use super::session::SharedSessionManager;
use super::snapshot::SnapshotStore;
use crate::backend::SecretBackend;
use crate::infra::shutdown_signal::ShutdownSignal;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Resolve on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never fires,
/// so the process can still be stopped by the other one.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Trigger `shutdown` once a termination signal arrives.
pub fn spawn_signal_listener(shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_termination().await;
        shutdown.trigger();
    })
}

/// Revokes the session and removes the snapshot on exit.
///
/// With revoke-on-quit disabled the leases outlive the process, so the
/// snapshot is kept for the next `keep-alive` to resume from.
pub struct ShutdownHandler {
    backend: Arc<dyn SecretBackend>,
    sessions: SharedSessionManager,
    store: SnapshotStore,
    revoke_on_quit: bool,
}

impl ShutdownHandler {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        sessions: SharedSessionManager,
        store: SnapshotStore,
        revoke_on_quit: bool,
    ) -> Self {
        Self {
            backend,
            sessions,
            store,
            revoke_on_quit,
        }
    }

    /// Best effort: failures are logged and never abort the sequence.
    pub async fn handle(&self) {
        if !self.revoke_on_quit {
            info!("Shutdown complete, snapshot kept at {}", self.store.path().display());
            return;
        }

        self.revoke().await;
        if let Err(e) = self.store.clear() {
            warn!("Failed to remove snapshot: {}", e);
        }
        info!("Shutdown complete");
    }

    async fn revoke(&self) {
        let mut sessions = self.sessions.lock().await;
        let token = match sessions.current() {
            Some(session) => session.token.clone(),
            None => match self.store.load() {
                Ok(snapshot) if !snapshot.login_token.is_empty() => snapshot.login_token,
                _ => {
                    info!("No active session to revoke");
                    return;
                }
            },
        };

        info!("Revoking session token");
        match self.backend.revoke_session(&token).await {
            Ok(()) => info!("Session token revoked"),
            Err(e) => warn!("Failed to revoke session token: {}", e),
        }
        sessions.invalidate();
    }
}
