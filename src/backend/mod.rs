//! Secret backend capability.
//!
//! The lifecycle core only talks to Vault through [`SecretBackend`]; the
//! production implementation is [`vault::VaultClient`].

pub mod vault;

pub use vault::VaultClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Wire Types
// ============================================================================

/// Renewal handle for a previously fetched secret.
///
/// This is the Vault response envelope minus the secret `data`, which is what
/// gets persisted in the snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LeaseRecord {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
}

impl LeaseRecord {
    /// Whether the scheduler has to keep this lease alive.
    pub fn needs_renewal(&self) -> bool {
        self.renewable && self.lease_duration > 0
    }
}

/// A secret read from the backend.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SecretResponse {
    #[serde(flatten)]
    pub lease: LeaseRecord,
    #[serde(default)]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Outcome of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub client_token: String,
    /// Seconds until the token expires; zero for non-expiring tokens.
    pub lease_duration: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by backend calls.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The request never produced an HTTP response.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{url} returned {status}: {}", .errors.join("; "))]
    Api {
        url: String,
        status: u16,
        errors: Vec<String>,
    },

    /// The response body was not what the protocol promises.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BackendError {
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// The backend refused the session token itself (401/403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, BackendError::Api { status: 401 | 403, .. })
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Protocol operations the lifecycle core needs from a secret store.
///
/// Every authenticated call takes the session token explicitly; the backend
/// itself holds no session state.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Exchange a delegated identity token for a session token.
    async fn login(&self, role: &str, identity_token: &str) -> Result<LoginResponse, BackendError>;

    /// Read the secret stored at `path`.
    async fn read_secret(&self, token: &str, path: &str) -> Result<SecretResponse, BackendError>;

    /// Extend a lease by `increment` seconds.
    async fn renew_lease(
        &self,
        token: &str,
        lease_id: &str,
        increment: u64,
    ) -> Result<LeaseRecord, BackendError>;

    /// Extend the session token itself; returns the new lease duration.
    async fn renew_session(&self, token: &str) -> Result<u64, BackendError>;

    /// Revoke the session token and, with it, every lease it owns.
    async fn revoke_session(&self, token: &str) -> Result<(), BackendError>;
}
