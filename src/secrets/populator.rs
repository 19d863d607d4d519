//! One-shot population of every configured secret.

use super::error::{LifecycleError, Result};
use super::session::SharedSessionManager;
use super::snapshot::{Snapshot, SnapshotStore};
use super::sources::SourceRegistry;
use crate::config::{OutputFormat, SecretDefinition};
use crate::infra::clock::SharedClock;
use crate::output::{self, formatter};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

pub struct Populator {
    sessions: SharedSessionManager,
    sources: SourceRegistry,
    store: SnapshotStore,
    clock: SharedClock,
}

impl Populator {
    pub fn new(
        sessions: SharedSessionManager,
        sources: SourceRegistry,
        store: SnapshotStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            sessions,
            sources,
            store,
            clock,
        }
    }

    /// Fetch and write every definition in order, then persist the snapshot.
    ///
    /// Any failure aborts the pass before the snapshot is written.
    pub async fn populate(&self, definitions: &[SecretDefinition]) -> Result<Snapshot> {
        info!("Starting secret population");
        self.store.clear()?;
        remove_previous_dotenv_blocks(definitions)?;

        let session = self.sessions.lock().await.acquire(None).await?;
        let mut snapshot = Snapshot::new(self.clock.now_unix());

        for definition in definitions {
            info!("Populating secret {}", definition.name);
            let origin = definition.origin();
            let source = self.sources.get(origin).ok_or_else(|| {
                LifecycleError::fetch(&definition.name, format!("no source registered for origin '{origin}'"))
            })?;

            let fetched = source.fetch(definition, &session).await?;
            if let Some(lease) = fetched.lease {
                snapshot.secrets.push(lease);
            }

            output::write_secret(fetched.data, definition)
                .map_err(|e| LifecycleError::from_output(&definition.name, e))?;
        }

        snapshot.set_session(session.token.clone(), session.lease_duration);
        self.store.save(&snapshot)?;

        info!(
            "Finished secret population: {} secret(s), {} renewable lease(s)",
            definitions.len(),
            snapshot.renewable_count()
        );
        Ok(snapshot)
    }
}

/// Strip the blocks a previous pass appended to each dotenv destination.
///
/// Blocks are appended during a pass so several definitions can share a
/// file. Removing only the blocks named after configured secrets keeps the
/// rest of the file intact and makes a re-run produce the same content.
fn remove_previous_dotenv_blocks(definitions: &[SecretDefinition]) -> Result<()> {
    let mut by_destination: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for definition in definitions
        .iter()
        .filter(|d| d.output_format() == Some(OutputFormat::Dotenv))
    {
        by_destination
            .entry(definition.destination.as_str())
            .or_default()
            .insert(definition.name.as_str());
    }

    for (destination, names) in by_destination {
        if formatter::remove_dotenv_blocks(Path::new(destination), &names)
            .map_err(|e| LifecycleError::from_output(destination, e))?
        {
            info!("Removed previous secret blocks from {}", destination);
        }
    }
    Ok(())
}
