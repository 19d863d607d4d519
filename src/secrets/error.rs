//! Error taxonomy for the secret lifecycle.

use crate::backend::BackendError;
use crate::output::OutputError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors surfaced by populate and keep-alive.
///
/// Helpers only classify; the driver in `main` decides which ones end the
/// process and with what exit code.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Malformed or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Login or re-authentication failed.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// A secret could not be read or decoded during populate.
    #[error("failed to fetch secret '{secret}': {message}")]
    Fetch { secret: String, message: String },

    /// A lease or session renewal call failed during keep-alive.
    #[error("renewal failed: {message}")]
    Renewal { message: String },

    /// Snapshot or destination I/O failed.
    #[error("I/O error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl LifecycleError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn fetch(secret: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            secret: secret.into(),
            message: message.into(),
        }
    }

    pub fn renewal(message: impl Into<String>) -> Self {
        Self::Renewal {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Only renewal failures are retried by the scheduler.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::Renewal { .. })
    }

    /// Wrap an output-stage failure for the secret it belongs to.
    pub fn from_output(secret: &str, err: OutputError) -> Self {
        match err {
            OutputError::Io { path, source } => Self::io(path, source),
            OutputError::NotADirectory(path) => Self::io(path, "not a directory"),
            other => Self::fetch(secret, other.to_string()),
        }
    }

    /// Reclassify a keep-alive failure as retryable.
    ///
    /// Re-authentication during keep-alive is retried like any renewal.
    pub fn into_renewal(self) -> Self {
        match self {
            LifecycleError::Auth { message } => Self::renewal(format!("re-authentication: {message}")),
            LifecycleError::Renewal { .. } => self,
            other => Self::renewal(other.to_string()),
        }
    }
}

impl From<BackendError> for LifecycleError {
    fn from(err: BackendError) -> Self {
        Self::renewal(err.to_string())
    }
}
