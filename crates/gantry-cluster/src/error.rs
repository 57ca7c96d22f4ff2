//! Error types for cluster gateway operations.

use thiserror::Error;

/// Result type alias for cluster gateway operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while talking to the cluster.
///
/// `Conflict` and `Timeout` are transient: callers either retry on the next
/// control-loop tick or perform one bounded retry. Everything else is
/// surfaced as-is.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to connect to cluster: {0}")]
    Connect(String),

    #[error("cluster api error: {0}")]
    Api(String),

    #[error("resource version conflict on {0}")]
    Conflict(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("invalid object reference: {0}")]
    InvalidRef(String),
}

impl ClusterError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Conflict(_) | ClusterError::Timeout(_))
    }
}
