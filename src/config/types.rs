use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Secret Definitions
// ============================================================================

/// Where a configured secret comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretOrigin {
    /// Read from Vault at `source`; produces a lease record.
    #[default]
    Vault,
    /// Read from the local filesystem at `source`.
    File,
    /// No data of its own; only the session token is required.
    Token,
}

impl SecretOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretOrigin::Vault => "vault",
            SecretOrigin::File => "file",
            SecretOrigin::Token => "token",
        }
    }
}

impl fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "vault" => Ok(SecretOrigin::Vault),
            "file" => Ok(SecretOrigin::File),
            "token" => Ok(SecretOrigin::Token),
            other => Err(format!("invalid origin: {other}")),
        }
    }
}

/// How a secret is written to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Appended as `KEY="value"` lines to a single file.
    Dotenv,
    /// One file per key inside a destination directory.
    File,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dotenv" => Ok(OutputFormat::Dotenv),
            "file" => Ok(OutputFormat::File),
            other => Err(format!("invalid format: {other}")),
        }
    }
}

/// A single secret to fetch and materialize.
///
/// `origin` and `format` are kept as raw strings until validation so that
/// every problem in the file is reported at once instead of failing on the
/// first unknown value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub format: String,
    /// Descend one level into the Vault payload under this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_base_key: Option<String>,
    /// Output key -> source key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decoders: Vec<String>,
}

impl SecretDefinition {
    /// Parsed origin. Call after validation; unknown values fall back to Vault.
    pub fn origin(&self) -> SecretOrigin {
        self.origin.parse().unwrap_or_default()
    }

    /// Parsed output format, if valid.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.format.parse().ok()
    }

    /// The sub-key, ignoring an empty string.
    pub fn base_key(&self) -> Option<&str> {
        self.secret_base_key.as_deref().filter(|k| !k.is_empty())
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Extra `EnvFilter` directive, e.g. `vaultkeeper=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}
