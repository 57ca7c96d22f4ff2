//! The gateway contract the control plane consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ClusterResult;
use crate::labels::LabelSelector;
use crate::object::{ClusterObject, ObjectKind, ObjectRef};

/// Result of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The object was already gone. Deletes are idempotent, so this is
    /// success, not an error.
    AlreadyAbsent,
}

/// Capability surface over the Kubernetes API.
///
/// The four core operations are `get`, `apply`, `delete`, and `list`.
/// `apply` is an idempotent upsert keyed by kind/namespace/name: callers
/// performing a partial update read the object, modify it, and apply it
/// back with the read's resource version, which the gateway rejects with
/// `Conflict` if the object changed in between. Applying with no resource
/// version writes unconditionally.
///
/// `restart_deployment` patches the pod template annotation that forces a
/// new pod generation, and `ping` backs readiness probes. Every call is
/// bounded by the implementation's timeout.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn get(&self, reference: &ObjectRef) -> ClusterResult<Option<ClusterObject>>;

    async fn apply(&self, object: ClusterObject) -> ClusterResult<ClusterObject>;

    async fn delete(&self, reference: &ObjectRef) -> ClusterResult<DeleteOutcome>;

    /// List objects of `kind` matching `selector`; `namespace` of `None`
    /// lists across all namespaces.
    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>>;

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        stamp: DateTime<Utc>,
    ) -> ClusterResult<()>;

    async fn ping(&self) -> ClusterResult<()>;
}
