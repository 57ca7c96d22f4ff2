//! Error types for the lifecycle controller.

use gantry_cluster::ClusterError;
use gantry_provision::ProvisionError;
use gantry_store::StoreError;
use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors that can occur while advancing environments.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("unknown environment {0}")]
    UnknownEnvironment(String),
}
