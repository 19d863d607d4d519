use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `vaultkeeper=info` is always
/// present as a floor.
pub fn init(config: &LoggingConfig) {
    let mut filter = EnvFilter::from_default_env();
    if let Some(directive) = config.level.as_deref().and_then(|l| l.parse().ok()) {
        filter = filter.add_directive(directive);
    }
    if let Ok(directive) = "vaultkeeper=info".parse() {
        filter = filter.add_directive(directive);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    // A subscriber may already be installed by a test harness.
    let _ = result;
}
