//! Origin-specific secret fetching.
//!
//! Each origin has one `SecretSource` implementation. Adding an origin means
//! adding a variant to `SecretOrigin` and a source here.

use super::error::{LifecycleError, Result};
use super::session::Session;
use crate::backend::{LeaseRecord, SecretBackend};
use crate::config::{SecretDefinition, SecretOrigin};
use crate::output::SecretData;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What one source produced for one definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedSecret {
    pub data: SecretData,
    /// Renewal handle to persist; only backend-managed secrets have one.
    pub lease: Option<LeaseRecord>,
}

#[async_trait]
pub trait SecretSource: Send + Sync {
    fn origin(&self) -> SecretOrigin;

    async fn fetch(&self, definition: &SecretDefinition, session: &Session) -> Result<FetchedSecret>;
}

// ============================================================================
// Vault
// ============================================================================

pub struct VaultSource {
    backend: Arc<dyn SecretBackend>,
}

impl VaultSource {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SecretSource for VaultSource {
    fn origin(&self) -> SecretOrigin {
        SecretOrigin::Vault
    }

    async fn fetch(&self, definition: &SecretDefinition, session: &Session) -> Result<FetchedSecret> {
        let response = self
            .backend
            .read_secret(&session.token, &definition.source)
            .await
            .map_err(|e| {
                LifecycleError::fetch(
                    &definition.name,
                    format!("failed to load {} from Vault: {e}", definition.source),
                )
            })?;

        let payload = response.data.unwrap_or_default();
        let data = select_base_key(payload, definition)?
            .into_iter()
            .map(|(key, value)| (key, stringify(value)))
            .collect();

        debug!(
            "Fetched {} (lease {}, renewable: {})",
            definition.source, response.lease.lease_id, response.lease.renewable
        );

        Ok(FetchedSecret {
            data,
            lease: Some(response.lease),
        })
    }
}

/// Descend exactly one level into the payload when a base key is set.
fn select_base_key(
    payload: serde_json::Map<String, Value>,
    definition: &SecretDefinition,
) -> Result<serde_json::Map<String, Value>> {
    let Some(key) = definition.base_key() else {
        return Ok(payload);
    };

    match payload.get(key) {
        Some(Value::Object(inner)) => Ok(inner.clone()),
        Some(_) => Err(LifecycleError::fetch(
            &definition.name,
            format!("value under base key '{key}' is not a mapping"),
        )),
        None => Err(LifecycleError::fetch(
            &definition.name,
            format!("base key '{key}' not found in secret data"),
        )),
    }
}

/// String form of a payload value. Strings are taken verbatim, everything
/// else is rendered as JSON.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Default)]
pub struct FileSource;

#[async_trait]
impl SecretSource for FileSource {
    fn origin(&self) -> SecretOrigin {
        SecretOrigin::File
    }

    async fn fetch(&self, definition: &SecretDefinition, _session: &Session) -> Result<FetchedSecret> {
        let path = Path::new(&definition.source);
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            LifecycleError::fetch(
                &definition.name,
                format!("failed to read source file {}: {e}", path.display()),
            )
        })?;

        let key = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                LifecycleError::fetch(&definition.name, format!("source {} has no file name", path.display()))
            })?;

        let mut data = SecretData::new();
        data.insert(key, String::from_utf8_lossy(&bytes).into_owned());

        Ok(FetchedSecret { data, lease: None })
    }
}

// ============================================================================
// Token only
// ============================================================================

/// Produces no data; the definition only exists to require a session.
#[derive(Debug, Default)]
pub struct TokenSource;

#[async_trait]
impl SecretSource for TokenSource {
    fn origin(&self) -> SecretOrigin {
        SecretOrigin::Token
    }

    async fn fetch(&self, _definition: &SecretDefinition, _session: &Session) -> Result<FetchedSecret> {
        Ok(FetchedSecret::default())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Looks up the source for a definition's origin.
pub struct SourceRegistry {
    sources: Vec<Box<dyn SecretSource>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self { sources }
    }

    /// Vault, file and token sources backed by `backend`.
    pub fn with_defaults(backend: Arc<dyn SecretBackend>) -> Self {
        Self::new(vec![
            Box::new(VaultSource::new(backend)),
            Box::new(FileSource),
            Box::new(TokenSource),
        ])
    }

    pub fn get(&self, origin: SecretOrigin) -> Option<&dyn SecretSource> {
        self.sources
            .iter()
            .find(|s| s.origin() == origin)
            .map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn session() -> Session {
        Session {
            token: "s.test".into(),
            lease_duration: 0,
            expires_at: None,
        }
    }

    fn map(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn base_key_descends_one_level() {
        let def = SecretDefinition {
            name: "kv".into(),
            secret_base_key: Some("data".into()),
            ..Default::default()
        };
        let payload = map(json!({"data": {"user": "u"}, "metadata": {"version": 3}}));
        let selected = select_base_key(payload, &def).unwrap();
        assert_eq!(selected.get("user"), Some(&json!("u")));
        assert!(selected.get("metadata").is_none());
    }

    #[test]
    fn base_key_missing_or_scalar_fails() {
        let def = SecretDefinition {
            name: "kv".into(),
            secret_base_key: Some("data".into()),
            ..Default::default()
        };
        let err = select_base_key(map(json!({"other": {}})), &def).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = select_base_key(map(json!({"data": "flat"})), &def).unwrap_err();
        assert!(err.to_string().contains("not a mapping"));
    }

    #[test]
    fn stringify_values() {
        assert_eq!(stringify(json!("text")), "text");
        assert_eq!(stringify(json!(42)), "42");
        assert_eq!(stringify(json!(true)), "true");
        assert_eq!(stringify(json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(stringify(Value::Null), "");
    }

    #[tokio::test]
    async fn file_source_keys_by_base_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, "CERTDATA").unwrap();
        let def = SecretDefinition {
            name: "ca".into(),
            source: path.display().to_string(),
            ..Default::default()
        };

        let fetched = FileSource.fetch(&def, &session()).await.unwrap();
        assert_eq!(fetched.data.len(), 1);
        assert_eq!(fetched.data["ca.crt"], "CERTDATA");
        assert!(fetched.lease.is_none());
    }

    #[tokio::test]
    async fn file_source_missing_file_fails() {
        let def = SecretDefinition {
            name: "ca".into(),
            source: "/nonexistent/ca.crt".into(),
            ..Default::default()
        };
        let err = FileSource.fetch(&def, &session()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Fetch { .. }));
    }

    #[tokio::test]
    async fn token_source_is_empty() {
        let fetched = TokenSource
            .fetch(&SecretDefinition::default(), &session())
            .await
            .unwrap();
        assert!(fetched.data.is_empty());
        assert!(fetched.lease.is_none());
    }

    #[test]
    fn registry_finds_each_origin() {
        let registry = SourceRegistry::new(vec![Box::new(FileSource), Box::new(TokenSource)]);
        assert!(registry.get(SecretOrigin::File).is_some());
        assert!(registry.get(SecretOrigin::Token).is_some());
        assert!(registry.get(SecretOrigin::Vault).is_none());
    }
}
