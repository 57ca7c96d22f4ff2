//! gantry-store: cluster-derived state for the Gantry portal.
//!
//! Defines the record types Gantry derives from object labels and
//! annotations, and the [`ReconciliationStore`] that rebuilds them by
//! listing managed objects. The cluster is the single source of truth;
//! this crate never persists anything of its own.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::{ReconciliationStore, RefreshStats};
pub use types::{
    DEFAULT_TTL_HOURS, EnvironmentId, EnvironmentRecord, EnvironmentSpec, EnvironmentStatus,
    HistoryEntry, MAX_TTL_HOURS, MIN_TTL_HOURS, SecretRecord, ServiceId, ServiceSpec,
    expires_at_for, namespace_for, parse_history, validate_environment_name, validate_ttl,
};
