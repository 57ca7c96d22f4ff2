//! Error types for the reconciliation store.

use gantry_cluster::ClusterError;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while deriving records from cluster state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("malformed object metadata: {0}")]
    Malformed(String),

    #[error("service id {service_id} matches {count} secrets, expected exactly one")]
    AmbiguousServiceId { service_id: String, count: usize },

    #[error("invalid input: {0}")]
    Invalid(String),
}
