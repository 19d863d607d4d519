//! Output stage: key mapping, decode chain, and formatters.

pub mod decoder;
pub mod formatter;

pub use decoder::Decoder;

use crate::config::{OutputFormat, SecretDefinition};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Plain key/value pairs of one fetched secret.
///
/// Ordered so that formatter output is stable between runs.
pub type SecretData = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("invalid decoder: {0}")]
    UnknownDecoder(String),

    #[error("invalid format for secret '{secret}': {format}")]
    UnknownFormat { secret: String, format: String },

    #[error("mapping failed in secret '{secret}': key '{key}' doesn't exist in secret data")]
    MissingMappedKey { secret: String, key: String },

    #[error("failed to decode value for '{key}' in secret '{secret}': {message}")]
    Decode {
        secret: String,
        key: String,
        message: String,
    },

    #[error("key '{key}' in secret '{secret}' is not a plain file name")]
    InvalidFileKey { secret: String, key: String },

    #[error("destination {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OutputError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Map, decode and write one secret to its destination.
pub fn write_secret(data: SecretData, definition: &SecretDefinition) -> Result<(), OutputError> {
    info!("Writing secret {}", definition.name);

    let format = definition
        .output_format()
        .ok_or_else(|| OutputError::UnknownFormat {
            secret: definition.name.clone(),
            format: definition.format.clone(),
        })?;
    let decoder = Decoder::new(&definition.decoders)?;

    let decoded = formatter::map_keys(data, definition)?
        .into_iter()
        .map(|(key, value)| match decoder.decode(&value) {
            Ok(bytes) => Ok((key, bytes)),
            Err(message) => Err(OutputError::Decode {
                secret: definition.name.clone(),
                key,
                message,
            }),
        })
        .collect::<Result<formatter::DecodedData, _>>()?;

    match format {
        OutputFormat::Dotenv => formatter::write_dotenv(definition, &decoded),
        OutputFormat::File => formatter::write_files(definition, &decoded),
    }
}
