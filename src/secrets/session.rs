//! Authenticated session cache.

use super::error::{LifecycleError, Result};
use crate::backend::SecretBackend;
use crate::infra::clock::SharedClock;
use chrono::DateTime;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Seconds before expiry at which a cached session stops being reused.
pub const SESSION_SAFETY_MARGIN_SECS: i64 = 5;

/// An authenticated backend session. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    /// Seconds the token was granted for; zero when it does not expire.
    pub lease_duration: u64,
    /// Unix seconds; `None` for non-expiring tokens.
    pub expires_at: Option<i64>,
}

impl Session {
    fn new(token: String, lease_duration: u64, issued_at: i64) -> Self {
        let expires_at = (lease_duration > 0).then(|| issued_at + lease_duration as i64);
        Self {
            token,
            lease_duration,
            expires_at,
        }
    }

    /// Usable at `now` with the safety margin to spare.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at
            .map_or(true, |expires_at| expires_at > now + SESSION_SAFETY_MARGIN_SECS)
    }
}

/// A persisted token the manager can adopt instead of logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub token: String,
    pub lease_duration: u64,
    /// Unix seconds the lease duration is measured from.
    pub issued_at: i64,
}

/// Owns the current session and decides between reuse, resume and login.
pub struct SessionManager {
    backend: Arc<dyn SecretBackend>,
    role: String,
    token_path: PathBuf,
    clock: SharedClock,
    current: Option<Session>,
}

pub type SharedSessionManager = Arc<Mutex<SessionManager>>;

impl SessionManager {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        role: impl Into<String>,
        token_path: impl Into<PathBuf>,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend,
            role: role.into(),
            token_path: token_path.into(),
            clock,
            current: None,
        }
    }

    pub fn shared(self) -> SharedSessionManager {
        Arc::new(Mutex::new(self))
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Return a valid session, logging in only when nothing reusable exists.
    ///
    /// A resume token that has already run out is ignored in favour of a
    /// fresh login.
    pub async fn acquire(&mut self, resume: Option<&ResumeToken>) -> Result<Session> {
        let now = self.clock.now_unix();

        if let Some(session) = self.current.as_ref().filter(|s| s.is_valid_at(now)) {
            return Ok(session.clone());
        }

        if let Some(resume) = resume.filter(|r| !r.token.is_empty()) {
            let session = Session::new(resume.token.clone(), resume.lease_duration, resume.issued_at);
            if session.is_valid_at(now) {
                debug!("Resuming session from persisted token");
                self.current = Some(session.clone());
                return Ok(session);
            }
            info!("Persisted token is expired or about to expire, logging in again");
        }

        self.login().await
    }

    async fn login(&mut self) -> Result<Session> {
        let jwt = tokio::fs::read_to_string(&self.token_path).await.map_err(|e| {
            LifecycleError::auth(format!(
                "failed to load the service account token from {}: {e}",
                self.token_path.display()
            ))
        })?;

        let response = self
            .backend
            .login(&self.role, &jwt)
            .await
            .map_err(|e| LifecycleError::auth(e.to_string()))?;

        let session = Session::new(response.client_token, response.lease_duration, self.clock.now_unix());
        match session.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
            Some(at) => info!("Created session, token expires at {}", at),
            None => info!("Created session with a non-expiring token"),
        }

        self.current = Some(session.clone());
        Ok(session)
    }

    /// Replace the cached session after a successful `renew-self`.
    pub fn record_renewal(&mut self, lease_duration: u64) -> Option<&Session> {
        let now = self.clock.now_unix();
        let token = self.current.take()?.token;
        self.current = Some(Session::new(token, lease_duration, now));
        self.current.as_ref()
    }

    /// Drop the cached session, e.g. after it was revoked.
    pub fn invalidate(&mut self) -> Option<Session> {
        self.current.take()
    }
}
