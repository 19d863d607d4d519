use super::{Config, OutputFormat, SecretDefinition, SecretOrigin, VALID_DECODERS};
use anyhow::Result;
use std::path::Path;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn push(errors: &mut Vec<ConfigValidationError>, path: impl Into<String>, message: impl Into<String>) {
    errors.push(ConfigValidationError {
        path: path.into(),
        message: message.into(),
    });
}

/// Validate a configuration object.
///
/// Creates the data directory if it is missing.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    prepare_data_dir(&config.data_dir, &mut errors);

    if config.vault_url.is_empty() {
        push(&mut errors, "vaultUrl", "No Vault URL set");
    } else if let Err(e) = url::Url::parse(&config.vault_url) {
        push(&mut errors, "vaultUrl", format!("Invalid Vault URL: {e}"));
    }

    if config.role.is_empty() {
        push(&mut errors, "role", "No role set");
    }

    if config.vault_auth_method_path.is_empty() {
        push(&mut errors, "vaultAuthMethodPath", "No Vault auth method path set");
    }

    if !config.token_path.exists() {
        push(
            &mut errors,
            "tokenPath",
            format!("Token file does not exist at {}", config.token_path.display()),
        );
    }

    if config.http_port == 0 {
        push(&mut errors, "httpPort", "Port must be greater than 0");
    }

    for (idx, secret) in config.secrets.iter().enumerate() {
        validate_secret(secret, idx, &mut errors);
    }

    errors
}

fn prepare_data_dir(data_dir: &Path, errors: &mut Vec<ConfigValidationError>) {
    if data_dir.as_os_str().is_empty() {
        push(errors, "dataDir", "No data directory defined");
        return;
    }

    if !data_dir.exists() {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            push(errors, "dataDir", format!("Failed to create data directory: {e}"));
        }
    } else if !data_dir.is_dir() {
        push(errors, "dataDir", "The data directory is not a directory");
    }
}

fn validate_secret(secret: &SecretDefinition, idx: usize, errors: &mut Vec<ConfigValidationError>) {
    let path = format!("secrets[{idx}]");

    let origin = match secret.origin.parse::<SecretOrigin>() {
        Ok(origin) => Some(origin),
        Err(e) => {
            push(errors, format!("{path}.origin"), e);
            None
        }
    };

    if secret.name.is_empty() {
        push(errors, format!("{path}.name"), "No name set");
    }

    if secret.source.is_empty() && origin != Some(SecretOrigin::Token) {
        push(errors, format!("{path}.source"), "No source set");
    }

    if secret.destination.is_empty() {
        push(errors, format!("{path}.destination"), "No destination set");
    }

    if let Err(e) = secret.format.parse::<OutputFormat>() {
        push(errors, format!("{path}.format"), e);
    }

    for decoder in &secret.decoders {
        if !VALID_DECODERS.contains(&decoder.as_str()) {
            push(errors, format!("{path}.decoders"), format!("invalid decoder: {decoder}"));
        }
    }
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
