//! Error types for provisioning operations.

use gantry_cluster::ClusterError;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while applying or destroying infrastructure.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("terraform: {0}")]
    Terraform(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(String),
}
