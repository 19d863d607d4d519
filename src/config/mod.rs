mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level vaultkeeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding the persisted lease snapshot.
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub vault_url: String,
    /// Service account JWT used for the Kubernetes auth login.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub vault_auth_method_path: String,
    #[serde(default)]
    pub revoke_auth_lease_on_quit: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub secrets: Vec<SecretDefinition>,
}

fn default_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_PATH)
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

impl Config {
    /// Load, apply environment overrides, and validate a config file.
    ///
    /// The data directory is created as part of validation.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading config from {}", path.display());
        let value = read_config_file_snapshot(path)?;
        let mut config: Config = serde_json::from_value(value)?;

        config.apply_env_overrides();
        validate_config_object(&config)?;

        debug!(
            "Loaded {} secret definition(s) from {}",
            config.secrets.len(),
            path.display()
        );
        Ok(config)
    }

    /// Path of the persisted snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Every set variable replaces the configured value.
    /// `VAULTKEEPER_NAMESPACE` wins over the generic `VAULT_NAMESPACE`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("VAULTKEEPER_VAULT_URL") {
            self.vault_url = url;
        }

        if let Some(role) = var("VAULTKEEPER_ROLE") {
            self.role = role;
        }

        if let Some(namespace) = var("VAULTKEEPER_NAMESPACE").or_else(|| var("VAULT_NAMESPACE")) {
            self.namespace = namespace;
        }

        if let Some(port) = var("VAULTKEEPER_HTTP_PORT").and_then(|p| p.parse().ok()) {
            self.http_port = port;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            vault_url: String::new(),
            token_path: default_token_path(),
            namespace: String::new(),
            role: String::new(),
            vault_auth_method_path: String::new(),
            revoke_auth_lease_on_quit: false,
            http_port: DEFAULT_HTTP_PORT,
            logging: LoggingConfig::default(),
            secrets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join("token");
        fs::write(&token, "jwt").unwrap();
        let data_dir = dir.path().join("state");
        let file = dir.path().join("config.yaml");
        fs::write(
            &file,
            format!(
                r#"
dataDir: {}
vaultUrl: http://127.0.0.1:8200
tokenPath: {}
role: app
vaultAuthMethodPath: kubernetes
revokeAuthLeaseOnQuit: true
secrets:
  - name: db
    source: database/creds/app
    destination: {}/db
    format: file
"#,
                data_dir.display(),
                token.display(),
                dir.path().display()
            ),
        )
        .unwrap();

        let config = Config::load(&file).unwrap();
        assert_eq!(config.role, "app");
        assert!(config.revoke_auth_lease_on_quit);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.secrets.len(), 1);
        assert!(data_dir.is_dir(), "data dir should be created on load");
        assert_eq!(config.snapshot_path(), data_dir.join("data.yaml"));
    }

    #[test]
    fn load_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        fs::write(&file, "secrets: []\n").unwrap();

        let err = Config::load(&file).unwrap_err().to_string();
        assert!(err.contains("vaultUrl"));
        assert!(err.contains("role"));
    }

    #[test]
    fn env_overrides_replace_config_values() {
        let env: std::collections::HashMap<&str, &str> = [
            ("VAULTKEEPER_ROLE", "other-role"),
            ("VAULTKEEPER_NAMESPACE", "team-b"),
            ("VAULT_NAMESPACE", "ignored"),
            ("VAULTKEEPER_HTTP_PORT", "9100"),
        ]
        .into();
        let mut config = Config {
            vault_url: "http://vault:8200".into(),
            role: "app".into(),
            namespace: "team-a".into(),
            ..Default::default()
        };

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.vault_url, "http://vault:8200");
        assert_eq!(config.role, "other-role");
        assert_eq!(config.namespace, "team-b");
        assert_eq!(config.http_port, 9100);
    }

    #[test]
    fn generic_vault_namespace_overrides_config() {
        let mut config = Config {
            namespace: "team-a".into(),
            ..Default::default()
        };
        config.apply_overrides(|key| (key == "VAULT_NAMESPACE").then(|| "team-c".to_string()));
        assert_eq!(config.namespace, "team-c");

        config.apply_overrides(|key| (key == "VAULTKEEPER_HTTP_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn defaults_applied() {
        let config: Config = serde_yaml::from_str("vaultUrl: http://v\n").unwrap();
        assert_eq!(config.token_path, PathBuf::from(DEFAULT_TOKEN_PATH));
        assert_eq!(config.http_port, 8000);
        assert!(!config.revoke_auth_lease_on_quit);
    }
}
