/// Default configuration constants used across the system.

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default liveness endpoint port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Where Kubernetes mounts the service account token.
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Name of the persisted snapshot file inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "data.yaml";

/// Decoders understood by the output pipeline.
pub const VALID_DECODERS: &[&str] = &["base64"];
