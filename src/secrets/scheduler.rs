//! Lease renewal scheduler.
//!
//! Runs after populate: sleeps until the next renewal deadline, renews the
//! session and every renewable lease, persists the snapshot and repeats.
//! Failed batches are retried with a fixed backoff for as long as the
//! shortest-lived credential has not run out.

use super::error::{LifecycleError, Result};
use super::liveness::Readiness;
use super::session::SharedSessionManager;
use super::snapshot::{Snapshot, SnapshotStore};
use crate::backend::{BackendError, SecretBackend};
use crate::infra::clock::SharedClock;
use crate::infra::shutdown_signal::{sleep_or_shutdown, ShutdownSignal, Wake};
use chrono::DateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Renew once `1/RENEWAL_DIVISOR` of the shortest lifetime has elapsed.
pub const RENEWAL_DIVISOR: u64 = 2;

/// Give up retrying this many seconds before the shortest expiry.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 5;

pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    pub divisor: u64,
    pub safety_margin_secs: i64,
    pub retry_backoff: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            divisor: RENEWAL_DIVISOR,
            safety_margin_secs: EXPIRY_SAFETY_MARGIN_SECS,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// How a scheduler run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// No renewable lease and a non-expiring session.
    NothingToRenew,
    /// Shutdown was requested while sleeping or backing off.
    Shutdown,
}

pub struct RenewalScheduler {
    backend: Arc<dyn SecretBackend>,
    sessions: SharedSessionManager,
    store: SnapshotStore,
    clock: SharedClock,
    readiness: Readiness,
    policy: RenewalPolicy,
}

impl RenewalScheduler {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        sessions: SharedSessionManager,
        store: SnapshotStore,
        clock: SharedClock,
        readiness: Readiness,
    ) -> Self {
        Self {
            backend,
            sessions,
            store,
            clock,
            readiness,
            policy: RenewalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drive renewals until nothing is left to renew, shutdown is requested,
    /// or a batch fails past the retry bound.
    pub async fn run(&self, mut snapshot: Snapshot, shutdown: &ShutdownSignal) -> Result<SchedulerExit> {
        info!(
            "Starting keep-alive for {} renewable lease(s)",
            snapshot.renewable_count()
        );

        loop {
            let Some(deadline) = snapshot.next_renewal_at(self.policy.divisor) else {
                info!("No renewable lease and the session does not expire, keep-alive has nothing to do");
                self.readiness.mark_ready();
                return Ok(SchedulerExit::NothingToRenew);
            };
            self.readiness.mark_ready();

            let wait = self.until(deadline);
            info!(
                "Next renewal at {} (in {}s)",
                format_unix(deadline),
                wait.as_secs()
            );

            if sleep_or_shutdown(wait, shutdown).await == Wake::Shutdown {
                info!("Shutdown requested, stopping keep-alive");
                return Ok(SchedulerExit::Shutdown);
            }

            if !self.renew_with_retry(&mut snapshot, shutdown).await? {
                info!("Shutdown requested during renewal backoff");
                return Ok(SchedulerExit::Shutdown);
            }

            self.store.save(&snapshot)?;
        }
    }

    /// Renew the batch, retrying while the shortest expiry is still ahead.
    ///
    /// Returns `false` when shutdown interrupted a backoff.
    async fn renew_with_retry(&self, snapshot: &mut Snapshot, shutdown: &ShutdownSignal) -> Result<bool> {
        let give_up_at = snapshot
            .shortest_expiry()
            .map(|expiry| expiry - self.policy.safety_margin_secs);

        loop {
            let err = match self.renew(snapshot).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            let now = self.clock.now_unix();
            match give_up_at {
                Some(bound) if now < bound => {
                    warn!(
                        "Renewal failed, retrying in {}s: {}",
                        self.policy.retry_backoff.as_secs(),
                        err
                    );
                    if sleep_or_shutdown(self.policy.retry_backoff, shutdown).await == Wake::Shutdown {
                        return Ok(false);
                    }
                }
                _ => {
                    error!("Renewal failed and leases are about to expire: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// One renewal batch: session first, then every renewable lease in order.
    async fn renew(&self, snapshot: &mut Snapshot) -> Result<()> {
        let started_at = self.clock.now_unix();
        let mut sessions = self.sessions.lock().await;

        let session = sessions
            .acquire(snapshot.resume_token().as_ref())
            .await
            .map_err(LifecycleError::into_renewal)?;

        let mut auth_lease_duration = session.lease_duration;
        if session.lease_duration > 0 {
            match self.backend.renew_session(&session.token).await {
                Ok(duration) => {
                    auth_lease_duration = duration;
                    sessions.record_renewal(duration);
                    debug!("Renewed session token for {}s", duration);
                }
                Err(err) => {
                    drop(sessions);
                    return Err(self.renewal_failure(snapshot, err).await);
                }
            }
        }
        drop(sessions);

        let mut failure = None;
        for lease in snapshot.secrets.iter_mut().filter(|l| l.needs_renewal()) {
            match self
                .backend
                .renew_lease(&session.token, &lease.lease_id, lease.lease_duration)
                .await
            {
                Ok(renewed) => {
                    debug!("Renewed lease {} for {}s", renewed.lease_id, renewed.lease_duration);
                    *lease = renewed;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            return Err(self.renewal_failure(snapshot, err).await);
        }

        snapshot.set_session(session.token, auth_lease_duration);
        snapshot.creation_timestamp = started_at;
        info!("Renewed {} lease(s)", snapshot.renewable_count());
        Ok(())
    }

    /// Classify a backend failure. A rejected token is dropped from the
    /// cache and the snapshot so the next attempt logs in again.
    async fn renewal_failure(&self, snapshot: &mut Snapshot, err: BackendError) -> LifecycleError {
        if err.is_auth_rejection() {
            warn!("Session token was rejected, logging in again on the next attempt");
            self.sessions.lock().await.invalidate();
            snapshot.set_session(String::new(), 0);
        }
        err.into()
    }

    fn until(&self, deadline: i64) -> Duration {
        let secs = (deadline - self.clock.now_unix()).max(0);
        Duration::from_secs(secs as u64)
    }
}

fn format_unix(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, LeaseRecord, LoginResponse, SecretResponse};
    use crate::infra::clock::{Clock, TokioClock};
    use crate::secrets::session::SessionManager;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Login(i64),
        RenewSession(i64),
        RejectedSession(i64),
        RenewLease(String, u64, i64),
    }

    struct FakeBackend {
        clock: Arc<TokioClock>,
        fail_leases: bool,
        session_duration: u64,
        rejected_token: Option<&'static str>,
        calls: Mutex<Vec<Call>>,
        lease_tokens: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SecretBackend for FakeBackend {
        async fn login(&self, _: &str, jwt: &str) -> std::result::Result<LoginResponse, BackendError> {
            assert_eq!(jwt, "service-account-jwt");
            self.calls.lock().unwrap().push(Call::Login(self.clock.now_unix()));
            Ok(LoginResponse {
                client_token: "s.fresh".into(),
                lease_duration: self.session_duration,
            })
        }

        async fn read_secret(&self, _: &str, _: &str) -> std::result::Result<SecretResponse, BackendError> {
            Err(BackendError::decode("fake", "read not expected"))
        }

        async fn renew_lease(
            &self,
            token: &str,
            lease_id: &str,
            increment: u64,
        ) -> std::result::Result<LeaseRecord, BackendError> {
            self.lease_tokens.lock().unwrap().push(token.to_string());
            self.calls.lock().unwrap().push(Call::RenewLease(
                lease_id.to_string(),
                increment,
                self.clock.now_unix(),
            ));
            if self.fail_leases {
                return Err(BackendError::Api {
                    url: "fake".into(),
                    status: 503,
                    errors: vec!["sealed".into()],
                });
            }
            Ok(LeaseRecord {
                lease_id: lease_id.to_string(),
                lease_duration: increment,
                renewable: true,
                ..Default::default()
            })
        }

        async fn renew_session(&self, token: &str) -> std::result::Result<u64, BackendError> {
            if self.rejected_token == Some(token) {
                self.calls
                    .lock()
                    .unwrap()
                    .push(Call::RejectedSession(self.clock.now_unix()));
                return Err(BackendError::Api {
                    url: "fake".into(),
                    status: 403,
                    errors: vec!["permission denied".into()],
                });
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::RenewSession(self.clock.now_unix()));
            Ok(self.session_duration)
        }

        async fn revoke_session(&self, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        backend: Arc<FakeBackend>,
        store: SnapshotStore,
        readiness: Readiness,
        scheduler: RenewalScheduler,
    }

    fn fixture(fail_leases: bool, session_duration: u64) -> Fixture {
        fixture_rejecting(fail_leases, session_duration, None)
    }

    fn fixture_rejecting(
        fail_leases: bool,
        session_duration: u64,
        rejected_token: Option<&'static str>,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "service-account-jwt").unwrap();
        let clock = Arc::new(TokioClock::at_unix(T));
        let backend = Arc::new(FakeBackend {
            clock: clock.clone(),
            fail_leases,
            session_duration,
            rejected_token,
            calls: Mutex::new(Vec::new()),
            lease_tokens: Mutex::new(Vec::new()),
        });
        let sessions = SessionManager::new(backend.clone(), "app", token_path, clock.clone()).shared();
        let store = SnapshotStore::new(dir.path().join("data.yaml"));
        let readiness = Readiness::new();
        let scheduler = RenewalScheduler::new(
            backend.clone(),
            sessions,
            store.clone(),
            clock,
            readiness.clone(),
        );
        Fixture {
            _dir: dir,
            backend,
            store,
            readiness,
            scheduler,
        }
    }

    fn lease(id: &str, duration: u64, renewable: bool) -> LeaseRecord {
        LeaseRecord {
            lease_id: id.into(),
            lease_duration: duration,
            renewable,
            ..Default::default()
        }
    }

    fn snapshot(auth_lease_duration: u64, secrets: Vec<LeaseRecord>) -> Snapshot {
        let mut snapshot = Snapshot::new(T);
        snapshot.set_session("s.persisted", auth_lease_duration);
        snapshot.secrets = secrets;
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_renewable_terminates_immediately() {
        let f = fixture(false, 0);
        let shutdown = ShutdownSignal::new();

        let exit = f
            .scheduler
            .run(snapshot(0, vec![lease("static", 0, false)]), &shutdown)
            .await
            .unwrap();

        assert_eq!(exit, SchedulerExit::NothingToRenew);
        assert!(f.backend.calls().is_empty());
        assert!(f.readiness.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn renews_at_half_life_and_persists() {
        let f = Arc::new(fixture(false, 0));
        let shutdown = ShutdownSignal::new();

        let runner = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                f.scheduler
                    .run(
                        snapshot(0, vec![lease("db/1", 100, true), lease("kv/1", 0, false)]),
                        &shutdown,
                    )
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert!(f.readiness.is_ready());

        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.trigger();
        let exit = runner.await.unwrap().unwrap();
        assert_eq!(exit, SchedulerExit::Shutdown);

        assert_eq!(
            f.backend.calls(),
            vec![
                Call::RenewLease("db/1".into(), 100, T + 50),
                Call::RenewLease("db/1".into(), 100, T + 100),
            ]
        );

        assert!(f.backend.lease_tokens.lock().unwrap().iter().all(|t| t == "s.persisted"));

        let persisted = f.store.load().unwrap();
        assert_eq!(persisted.creation_timestamp, T + 100);
        assert_eq!(persisted.login_token, "s.persisted");
        assert_eq!(persisted.secrets.len(), 2);
        assert_eq!(persisted.secrets[1], lease("kv/1", 0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_session_is_renewed_first() {
        let f = Arc::new(fixture(false, 60));
        let shutdown = ShutdownSignal::new();

        let runner = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                f.scheduler
                    .run(snapshot(60, vec![lease("db/1", 600, true)]), &shutdown)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(45)).await;
        shutdown.trigger();
        runner.await.unwrap().unwrap();

        assert_eq!(
            f.backend.calls(),
            vec![
                Call::RenewSession(T + 30),
                Call::RenewLease("db/1".into(), 600, T + 30),
            ]
        );
        let persisted = f.store.load().unwrap();
        assert_eq!(persisted.creation_timestamp, T + 30);
        assert_eq!(persisted.auth_lease_duration, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_session_logs_in_again_on_retry() {
        let f = Arc::new(fixture_rejecting(false, 60, Some("s.persisted")));
        let shutdown = ShutdownSignal::new();

        let runner = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                f.scheduler
                    .run(snapshot(60, vec![lease("db/1", 600, true)]), &shutdown)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(40)).await;
        shutdown.trigger();
        assert_eq!(runner.await.unwrap().unwrap(), SchedulerExit::Shutdown);

        assert_eq!(
            f.backend.calls(),
            vec![
                Call::RejectedSession(T + 30),
                Call::Login(T + 35),
                Call::RenewSession(T + 35),
                Call::RenewLease("db/1".into(), 600, T + 35),
            ]
        );
        assert_eq!(*f.backend.lease_tokens.lock().unwrap(), vec!["s.fresh".to_string()]);

        let persisted = f.store.load().unwrap();
        assert_eq!(persisted.login_token, "s.fresh");
        assert_eq!(persisted.creation_timestamp, T + 35);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_close_to_expiry_then_fails() {
        let f = fixture(true, 0);
        let shutdown = ShutdownSignal::new();

        let err = f
            .scheduler
            .run(snapshot(0, vec![lease("db/1", 100, true)]), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Renewal { .. }));

        let attempts: Vec<i64> = f
            .backend
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::RenewLease(_, _, at) => at,
                other => panic!("unexpected call {other:?}"),
            })
            .collect();

        assert_eq!(attempts.first(), Some(&(T + 50)));
        let last = *attempts.last().unwrap();
        assert!((T + 95..=T + 100).contains(&last), "last attempt at {}", last - T);
        assert!(attempts.windows(2).all(|w| w[1] - w[0] == 5));
        assert!(!f.store.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_sleep() {
        let f = Arc::new(fixture(false, 0));
        let shutdown = ShutdownSignal::new();

        let runner = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                f.scheduler
                    .run(snapshot(0, vec![lease("db/1", 3600, true)]), &shutdown)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.trigger();

        assert_eq!(runner.await.unwrap().unwrap(), SchedulerExit::Shutdown);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let f = Arc::new(fixture(true, 0));
        let shutdown = ShutdownSignal::new();

        let runner = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                f.scheduler
                    .run(snapshot(0, vec![lease("db/1", 100, true)]), &shutdown)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(52)).await;
        shutdown.trigger();

        assert_eq!(runner.await.unwrap().unwrap(), SchedulerExit::Shutdown);
        assert_eq!(f.backend.calls().len(), 1);
    }
}
