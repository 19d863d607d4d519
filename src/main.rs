use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use vaultkeeper::cli::{Cli, Commands, ConfigAction};
use vaultkeeper::config::{read_config_file_snapshot, render_config_yaml, Config, LoggingConfig};
use vaultkeeper::infra::shutdown_signal::ShutdownSignal;
use vaultkeeper::logging;
use vaultkeeper::secrets::{spawn_signal_listener, Lifecycle};

const EXIT_CONFIG: u8 = 1;
const EXIT_POPULATE: u8 = 2;
const EXIT_KEEP_ALIVE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Commands::Version = cli.command() {
        println!("vaultkeeper {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    logging::init(&logging_settings(&cli.config));

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }

    match cli.command() {
        Commands::Config(opts) => match opts.action {
            ConfigAction::Show => match render_config_yaml(&config) {
                Ok(yaml) => {
                    print!("{yaml}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("{:#}", e);
                    ExitCode::from(EXIT_CONFIG)
                }
            },
            ConfigAction::Validate => {
                info!("Configuration is valid");
                ExitCode::SUCCESS
            }
        },
        command => run_lifecycle(command, config).await,
    }
}

async fn run_lifecycle(command: &Commands, config: Config) -> ExitCode {
    let lifecycle = match Lifecycle::from_config(config) {
        Ok(lifecycle) => lifecycle,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let snapshot = match command {
        Commands::Run | Commands::Populate => match lifecycle.populate().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!("Secret population failed: {}", e);
                return ExitCode::from(EXIT_POPULATE);
            }
        },
        _ => None,
    };

    if let Commands::Populate = command {
        return ExitCode::SUCCESS;
    }

    info!("Starting vaultkeeper keep-alive");
    let shutdown = ShutdownSignal::new();
    let listener = spawn_signal_listener(shutdown.clone());
    let result = lifecycle.keep_alive(snapshot, shutdown).await;
    listener.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Keep-alive failed: {}", e);
            ExitCode::from(EXIT_KEEP_ALIVE)
        }
    }
}

/// Logging section of the config file, read before full validation so that
/// configuration errors are reported in the configured format.
fn logging_settings(path: &Path) -> LoggingConfig {
    read_config_file_snapshot(path)
        .ok()
        .and_then(|value| value.get("logging").cloned())
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}
