use anyhow::{bail, Context, Result};
use std::path::Path;

/// Maximum size for a config file (1 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 1024 * 1024;

/// Read a configuration file into a generic value.
///
/// Symlinks are followed since Kubernetes mounts ConfigMap keys through a
/// `..data` symlink. YAML is the native format; `.json` files are parsed as
/// JSON.
pub fn read_config_file_snapshot(path: &Path) -> Result<serde_json::Value> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Config file '{}' does not exist", path.display()))?;
    let metadata = std::fs::metadata(&canonical)
        .with_context(|| format!("Cannot stat config file '{}'", canonical.display()))?;

    if !metadata.is_file() {
        bail!("Config path '{}' is not a regular file", path.display());
    }

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(&canonical)
        .with_context(|| format!("Failed to read config file '{}'", canonical.display()))?;

    let value: serde_json::Value = match canonical.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse '{}' as JSON", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse '{}' as YAML", path.display()))?,
    };

    // An empty YAML document deserializes to null.
    if value.is_null() {
        return Ok(serde_json::Value::Object(Default::default()));
    }

    Ok(value)
}

/// Render a configuration as YAML for `config show`.
pub fn render_config_yaml<T: serde::Serialize>(config: &T) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}

// ============================================================================
// Tests
// ============================================================================
