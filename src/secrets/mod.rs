//! Secret lifecycle: populate once, then keep leases alive until shutdown.

pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod populator;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod snapshot;
pub mod sources;

pub use error::{LifecycleError, Result};
pub use lifecycle::Lifecycle;
pub use liveness::{LivenessServer, Readiness};
pub use populator::Populator;
pub use scheduler::{RenewalPolicy, RenewalScheduler, SchedulerExit, RENEWAL_DIVISOR};
pub use session::{ResumeToken, Session, SessionManager, SharedSessionManager};
pub use shutdown::{spawn_signal_listener, wait_for_termination, ShutdownHandler};
pub use snapshot::{Snapshot, SnapshotStore};
pub use sources::{FetchedSecret, FileSource, SecretSource, SourceRegistry, TokenSource, VaultSource};
