//! Wires the lifecycle components together for one configuration.

use super::error::{LifecycleError, Result};
use super::liveness::{LivenessServer, Readiness};
use super::populator::Populator;
use super::scheduler::{RenewalScheduler, SchedulerExit};
use super::session::{SessionManager, SharedSessionManager};
use super::shutdown::ShutdownHandler;
use super::snapshot::{Snapshot, SnapshotStore};
use super::sources::SourceRegistry;
use crate::backend::{SecretBackend, VaultClient};
use crate::config::Config;
use crate::infra::clock::{system_clock, SharedClock};
use crate::infra::shutdown_signal::ShutdownSignal;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub struct Lifecycle {
    config: Config,
    backend: Arc<dyn SecretBackend>,
    sessions: SharedSessionManager,
    store: SnapshotStore,
    clock: SharedClock,
}

impl Lifecycle {
    /// Lifecycle talking to the Vault server named in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = VaultClient::from_config(&config)
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        Ok(Self::with_backend(config, Arc::new(client), system_clock()))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn SecretBackend>, clock: SharedClock) -> Self {
        let sessions = SessionManager::new(
            backend.clone(),
            config.role.clone(),
            config.token_path.clone(),
            clock.clone(),
        )
        .shared();
        let store = SnapshotStore::new(config.snapshot_path());
        Self {
            config,
            backend,
            sessions,
            store,
            clock,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn populate(&self) -> Result<Snapshot> {
        let populator = Populator::new(
            self.sessions.clone(),
            SourceRegistry::with_defaults(self.backend.clone()),
            self.store.clone(),
            self.clock.clone(),
        );
        populator.populate(&self.config.secrets).await
    }

    /// Serve liveness and renew leases until `shutdown` fires.
    ///
    /// Without a snapshot from a preceding populate, the persisted one is
    /// loaded. When nothing needs renewing the process idles, still serving
    /// liveness, until shutdown. A clean stop runs the shutdown sequence; a
    /// fatal renewal error skips it and leaves the snapshot in place.
    pub async fn keep_alive(&self, snapshot: Option<Snapshot>, shutdown: ShutdownSignal) -> Result<()> {
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => self.store.load()?,
        };

        let readiness = Readiness::new();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let server = LivenessServer::start(addr, readiness.clone(), shutdown.clone())
            .await
            .map_err(|e| LifecycleError::Config(format!("cannot listen on {addr}: {e}")))?;

        let scheduler = RenewalScheduler::new(
            self.backend.clone(),
            self.sessions.clone(),
            self.store.clone(),
            self.clock.clone(),
            readiness,
        );

        let outcome = scheduler.run(snapshot, &shutdown).await;
        if let Ok(SchedulerExit::NothingToRenew) = outcome {
            info!("Waiting for a termination signal");
            shutdown.wait().await;
        }

        if outcome.is_ok() {
            ShutdownHandler::new(
                self.backend.clone(),
                self.sessions.clone(),
                self.store.clone(),
                self.config.revoke_auth_lease_on_quit,
            )
            .handle()
            .await;
        }

        shutdown.trigger();
        server.join().await;
        outcome.map(|_| ())
    }
}
