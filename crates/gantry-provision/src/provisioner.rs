//! The seam between desired environments and infrastructure changes.

use async_trait::async_trait;
use gantry_store::{EnvironmentId, EnvironmentRecord, EnvironmentSpec, ServiceId};

use crate::error::ProvisionResult;

/// What an apply call actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub environment_id: EnvironmentId,
    pub namespace: String,
    /// Secrets seeded on this call. Secrets that already existed are
    /// left untouched and do not appear here.
    pub seeded_secrets: Vec<ServiceId>,
}

/// Applies and destroys environment infrastructure as one retryable
/// unit.
///
/// Both operations are at-least-once: `apply` of a spec that is already
/// in place changes nothing, and `destroy` of resources that are
/// already gone reports success. Callers may therefore retry either
/// call after an ambiguous failure without inspecting what the first
/// attempt managed to do.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring the full desired state for one environment into existence.
    async fn apply(&self, spec: &EnvironmentSpec) -> ProvisionResult<Provisioned>;

    /// Tear down everything the environment owns.
    async fn destroy(&self, record: &EnvironmentRecord) -> ProvisionResult<()>;
}
