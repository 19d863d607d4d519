//! Durable record of session and lease state.
//!
//! The snapshot is what lets `keep-alive` resume after a restart: it holds the
//! session token, the token's lease duration and the renewal handle of every
//! Vault secret, all measured from a single `creationTimestamp`.

use super::error::{LifecycleError, Result};
use super::session::ResumeToken;
use crate::backend::LeaseRecord;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unix seconds every remaining lifetime is measured from.
    pub creation_timestamp: i64,
    #[serde(default)]
    pub login_token: String,
    /// Seconds; zero means the session does not expire.
    #[serde(default)]
    pub auth_lease_duration: u64,
    /// Lease handles in secret declaration order.
    #[serde(default)]
    pub secrets: Vec<LeaseRecord>,
}

impl Snapshot {
    pub fn new(creation_timestamp: i64) -> Self {
        Self {
            creation_timestamp,
            ..Default::default()
        }
    }

    /// Record the session that owns the snapshot's leases.
    pub fn set_session(&mut self, token: impl Into<String>, lease_duration: u64) {
        self.login_token = token.into();
        self.auth_lease_duration = lease_duration;
    }

    /// Token to resume from, if the snapshot carries one.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        if self.login_token.is_empty() {
            return None;
        }
        Some(ResumeToken {
            token: self.login_token.clone(),
            lease_duration: self.auth_lease_duration,
            issued_at: self.creation_timestamp,
        })
    }

    /// Durations of everything the scheduler keeps alive: the session (when
    /// it expires) and each renewable lease.
    fn tracked_durations(&self) -> impl Iterator<Item = u64> + '_ {
        let session = Some(self.auth_lease_duration).filter(|d| *d > 0);
        session.into_iter().chain(
            self.secrets
                .iter()
                .filter(|lease| lease.needs_renewal())
                .map(|lease| lease.lease_duration),
        )
    }

    /// Number of leases the renewal batch will touch.
    pub fn renewable_count(&self) -> usize {
        self.secrets.iter().filter(|l| l.needs_renewal()).count()
    }

    /// When the next renewal is due: a `1/divisor` fraction into the shortest
    /// tracked lifetime. `None` when nothing expires.
    pub fn next_renewal_at(&self, divisor: u64) -> Option<i64> {
        let divisor = divisor.max(1);
        self.tracked_durations()
            .min()
            .map(|shortest| self.creation_timestamp + (shortest / divisor) as i64)
    }

    /// When the shortest-lived tracked credential actually expires.
    pub fn shortest_expiry(&self) -> Option<i64> {
        self.tracked_durations()
            .min()
            .map(|shortest| self.creation_timestamp + shortest as i64)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Loads, saves and clears the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Err(LifecycleError::io(&self.path, "data file does not exist"));
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| LifecycleError::io(&self.path, format!("failed to read data file: {e}")))?;
        let snapshot: Snapshot = serde_yaml::from_str(&content)
            .map_err(|e| LifecycleError::io(&self.path, format!("failed to parse data file: {e}")))?;

        debug!(
            "Loaded snapshot from {} ({} lease(s), created at {})",
            self.path.display(),
            snapshot.secrets.len(),
            snapshot.creation_timestamp
        );
        Ok(snapshot)
    }

    /// Replace the snapshot file atomically (temp file + rename).
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let yaml = serde_yaml::to_string(snapshot)
            .map_err(|e| LifecycleError::io(&self.path, format!("failed to encode data file: {e}")))?;

        let tmp_path = self.path.with_extension("yaml.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)
        };

        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(LifecycleError::io(&self.path, format!("failed to write data file: {e}")));
        }

        debug!("Saved snapshot to {}", self.path.display());
        Ok(())
    }

    /// Delete the snapshot file. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Cleared snapshot {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LifecycleError::io(&self.path, format!("failed to delete data file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn lease(id: &str, duration: u64, renewable: bool) -> LeaseRecord {
        LeaseRecord {
            lease_id: id.into(),
            lease_duration: duration,
            renewable,
            ..Default::default()
        }
    }

    #[test]
    fn deadline_uses_shortest_renewable_lease() {
        let mut snapshot = Snapshot::new(1_000);
        snapshot.secrets = vec![
            lease("a", 300, true),
            lease("b", 90, true),
            lease("c", 10, false),
            lease("d", 0, true),
        ];

        assert_eq!(snapshot.next_renewal_at(2), Some(1_045));
        assert_eq!(snapshot.next_renewal_at(3), Some(1_030));
        assert_eq!(snapshot.shortest_expiry(), Some(1_090));
        assert_eq!(snapshot.renewable_count(), 3);
    }

    #[test]
    fn deadline_floors_division() {
        let mut snapshot = Snapshot::new(0);
        snapshot.secrets = vec![lease("a", 7, true)];
        assert_eq!(snapshot.next_renewal_at(2), Some(3));
    }

    #[test]
    fn deadline_equals_floor_of_min_over_divisor() {
        for durations in [vec![100, 45, 61], vec![7], vec![3600, 3599, 86400]] {
            for k in 1..=5u64 {
                let mut snapshot = Snapshot::new(500);
                snapshot.secrets = durations.iter().map(|d| lease("x", *d, true)).collect();
                let min = *durations.iter().min().unwrap();
                assert_eq!(snapshot.next_renewal_at(k), Some(500 + (min / k) as i64));
            }
        }
    }

    #[test]
    fn expiring_session_is_tracked() {
        let mut snapshot = Snapshot::new(100);
        snapshot.set_session("s.token", 60);
        snapshot.secrets = vec![lease("a", 600, true)];

        assert_eq!(snapshot.next_renewal_at(2), Some(130));
        assert_eq!(snapshot.shortest_expiry(), Some(160));
    }

    #[test]
    fn nothing_expiring_has_no_deadline() {
        let mut snapshot = Snapshot::new(100);
        snapshot.set_session("root", 0);
        snapshot.secrets = vec![lease("static", 0, false)];

        assert_eq!(snapshot.next_renewal_at(2), None);
        assert_eq!(snapshot.shortest_expiry(), None);
    }

    #[test]
    fn resume_token_requires_login_token() {
        let mut snapshot = Snapshot::new(100);
        assert!(snapshot.resume_token().is_none());

        snapshot.set_session("s.abc", 120);
        let resume = snapshot.resume_token().unwrap();
        assert_eq!(resume.token, "s.abc");
        assert_eq!(resume.lease_duration, 120);
        assert_eq!(resume.issued_at, 100);
    }

    #[test]
    fn store_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("data.yaml"));

        let mut snapshot = Snapshot::new(1_700_000_000);
        snapshot.set_session("s.token", 3600);
        snapshot.secrets = vec![lease("database/creds/app/1", 600, true)];

        store.save(&snapshot).unwrap();
        assert!(store.exists());
        assert!(!dir.path().join("data.yaml.tmp").exists());

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("creationTimestamp: 1700000000"));
        assert!(content.contains("loginToken: s.token"));
        assert!(content.contains("authLeaseDuration: 3600"));

        assert_eq!(store.load().unwrap(), snapshot);

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn load_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("data.yaml"));
        assert!(matches!(store.load(), Err(LifecycleError::Io { .. })));
    }

    #[test]
    fn load_corrupt_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("data.yaml"));
        std::fs::write(store.path(), "creationTimestamp: [not, a, number]\n").unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
