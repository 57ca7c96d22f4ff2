//! Error types for secret rotation.

use gantry_cluster::ClusterError;
use gantry_store::{ServiceId, StoreError};
use thiserror::Error;

/// Errors a rotation call can surface. `Cluster` and `Store` cover
/// transport and malformed-object failures; the rest map one-to-one
/// onto API status codes.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no secret found for service {0}")]
    NotFound(ServiceId),

    #[error("keys not present in secret: {keys:?}")]
    UnknownKey { keys: Vec<String> },

    #[error("invalid rotation request: {0}")]
    InvalidRequest(String),

    #[error("secret for service {0} kept changing during rotation")]
    ConflictRetry(ServiceId),

    #[error("a rotation for service {0} is already in flight")]
    RotationInProgress(ServiceId),
}
