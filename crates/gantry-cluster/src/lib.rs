//! gantry-cluster: the gateway boundary over the Kubernetes API.
//!
//! Everything the control plane knows about the cluster flows through
//! the [`ClusterGateway`] trait: get, apply (idempotent upsert with
//! optimistic concurrency), delete (already-absent is success), and
//! label-selected list. Two implementations ship: [`KubeGateway`] for a
//! real API server and [`FakeCluster`] for tests and standalone runs.
//!
//! Secret material is wrapped in [`SecretValue`], which never crosses
//! this boundary in readable form: redacted `Debug`, no serde, zeroed
//! on drop.

pub mod error;
pub mod fake;
pub mod gateway;
pub mod kube;
pub mod labels;
pub mod object;

pub use error::{ClusterError, ClusterResult};
pub use fake::{FakeCluster, FakeOp};
pub use gateway::{ClusterGateway, DeleteOutcome};
pub use self::kube::KubeGateway;
pub use labels::{LabelSelector, annotation, label};
pub use object::{
    ClusterObject, DeploymentInfo, ObjectKind, ObjectMeta, ObjectPayload, ObjectRef,
    SECRET_VALUE_LENGTH, SecretValue,
};
