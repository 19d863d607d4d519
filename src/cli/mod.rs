use crate::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vaultkeeper",
    version,
    about = "Materializes Vault secrets to disk and keeps their leases alive"
)]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, global = true, env = "VAULTKEEPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Port for the liveness endpoint. Overrides `httpPort` from the config.
    #[arg(long, global = true)]
    pub http_port: Option<u16>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Populate secrets, then keep their leases alive (default).
    Run,
    /// Fetch every configured secret once and write the snapshot.
    Populate,
    /// Resume from the persisted snapshot and renew leases until exit.
    KeepAlive,
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
}

impl Cli {
    /// The selected command, defaulting to `run`.
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Run)
    }
}
