//! Manifest-driven provisioner.
//!
//! Translates an [`EnvironmentSpec`] into the scaffold objects the
//! gateway understands: namespace, quota, limit range, RBAC, and one
//! secret + deployment + service per declared workload. Re-applying the
//! same spec is a no-op: identity annotations are written once, live
//! secret material is never reseeded, and rollout state is carried over.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use gantry_cluster::{
    ClusterGateway, ClusterObject, DeleteOutcome, DeploymentInfo, ObjectKind, ObjectMeta,
    ObjectPayload, ObjectRef, SECRET_VALUE_LENGTH, SecretValue, annotation, label,
};
use gantry_store::{EnvironmentRecord, EnvironmentSpec, EnvironmentStatus, HistoryEntry, ServiceSpec};
use tracing::{debug, info};

use crate::error::ProvisionResult;
use crate::provisioner::{Provisioned, Provisioner};

pub const QUOTA_NAME: &str = "gantry-quota";
pub const LIMITS_NAME: &str = "gantry-limits";
pub const SERVICE_ACCOUNT_NAME: &str = "gantry-env";
pub const ROLE_BINDING_NAME: &str = "gantry-env-edit";
const EDIT_ROLE: &str = "edit";

/// Keys seeded into every service secret at creation.
pub const DEFAULT_SECRET_KEYS: &[&str] = &["database_url", "api_key", "secret_key"];

/// Provisions environments by writing objects through the gateway.
pub struct ManifestProvisioner {
    gateway: Arc<dyn ClusterGateway>,
}

impl ManifestProvisioner {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Apply the namespace carrying the environment's full identity.
    /// Creation and expiry instants are written once and survive
    /// re-application unchanged.
    async fn apply_namespace(&self, spec: &EnvironmentSpec) -> ProvisionResult<ClusterObject> {
        let reference = ObjectRef::cluster(ObjectKind::Namespace, &spec.namespace);
        let mut object = match self.gateway.get(&reference).await? {
            Some(existing) => existing,
            None => ClusterObject::new(ObjectMeta::named(&spec.namespace), ObjectPayload::Namespace),
        };

        let meta = &mut object.meta;
        for (key, value) in &spec.labels {
            meta.labels.insert(key.clone(), value.clone());
        }
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels
            .insert(label::ENVIRONMENT_ID.into(), spec.environment_id.clone());
        meta.labels
            .insert(label::TTL_HOURS.into(), spec.ttl_hours.to_string());
        meta.labels.insert(
            label::EXPIRES_AT.into(),
            spec.expires_at.timestamp().to_string(),
        );
        meta.labels
            .insert(label::TEMPORARY_ENVIRONMENT.into(), "true".into());
        meta.labels
            .entry(label::ENVIRONMENT_STATUS.into())
            .or_insert_with(|| EnvironmentStatus::Creating.as_str().into());

        meta.annotations
            .entry(annotation::CREATED_AT.into())
            .or_insert_with(|| spec.created_at.to_rfc3339());
        meta.annotations
            .entry(annotation::EXPIRES_AT.into())
            .or_insert_with(|| spec.expires_at.to_rfc3339());
        meta.annotations
            .insert(annotation::ENVIRONMENT_NAME.into(), spec.name.clone());
        let service_ids: Vec<String> = spec
            .services
            .iter()
            .map(|s| spec.service_id(&s.name))
            .collect();
        meta.annotations.insert(
            annotation::SERVICES.into(),
            serde_json::json!(service_ids).to_string(),
        );

        Ok(self.gateway.apply(object).await?)
    }

    fn child_meta(&self, spec: &EnvironmentSpec, name: &str) -> ObjectMeta {
        let mut meta = ObjectMeta::namespaced(&spec.namespace, name);
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels
            .insert(label::ENVIRONMENT_ID.into(), spec.environment_id.clone());
        meta
    }

    async fn apply_scaffold(&self, spec: &EnvironmentSpec) -> ProvisionResult<()> {
        let quota = ClusterObject::new(
            self.child_meta(spec, QUOTA_NAME),
            ObjectPayload::ResourceQuota {
                hard: string_map(&[
                    ("requests.cpu", "2"),
                    ("requests.memory", "4Gi"),
                    ("limits.cpu", "4"),
                    ("limits.memory", "8Gi"),
                    ("pods", "20"),
                ]),
            },
        );
        self.gateway.apply(quota).await?;

        let limits = ClusterObject::new(
            self.child_meta(spec, LIMITS_NAME),
            ObjectPayload::LimitRange {
                default_limits: string_map(&[("cpu", "200m"), ("memory", "256Mi")]),
                default_requests: string_map(&[("cpu", "100m"), ("memory", "128Mi")]),
            },
        );
        self.gateway.apply(limits).await?;

        let account = ClusterObject::new(
            self.child_meta(spec, SERVICE_ACCOUNT_NAME),
            ObjectPayload::ServiceAccount,
        );
        self.gateway.apply(account).await?;

        let binding = ClusterObject::new(
            self.child_meta(spec, ROLE_BINDING_NAME),
            ObjectPayload::RoleBinding {
                service_account: SERVICE_ACCOUNT_NAME.to_string(),
                role: EDIT_ROLE.to_string(),
            },
        );
        self.gateway.apply(binding).await?;
        Ok(())
    }

    /// Apply one workload: its secret (seeded only if absent), its
    /// deployment, and its service. Returns whether a secret was seeded.
    async fn apply_service(
        &self,
        spec: &EnvironmentSpec,
        service: &ServiceSpec,
    ) -> ProvisionResult<bool> {
        let service_id = spec.service_id(&service.name);
        let secret_name = format!("{service_id}-secrets");

        let secret_ref =
            ObjectRef::namespaced(ObjectKind::Secret, &spec.namespace, &secret_name);
        let seeded = if self.gateway.get(&secret_ref).await?.is_none() {
            let mut meta = self.child_meta(spec, &secret_name);
            meta.labels
                .insert(label::SERVICE_ID.into(), service_id.clone());
            meta.annotations
                .insert(annotation::SECRET_TYPE.into(), "opaque".into());
            let first = HistoryEntry {
                version: 1,
                rotated_at: spec.created_at,
                rotated_by: "provisioner".to_string(),
            };
            meta.annotations.insert(
                annotation::ROTATION_HISTORY.into(),
                serde_json::json!([first]).to_string(),
            );
            let data = DEFAULT_SECRET_KEYS
                .iter()
                .map(|key| (key.to_string(), SecretValue::generate(SECRET_VALUE_LENGTH)))
                .collect();
            self.gateway
                .apply(ClusterObject::new(meta, ObjectPayload::Secret { data }))
                .await?;
            debug!(secret = %secret_name, "seeded service secret");
            true
        } else {
            false
        };

        let mut meta = self.child_meta(spec, &service.name);
        meta.labels.insert(label::APP.into(), service.name.clone());
        meta.labels
            .insert(label::SERVICE_ID.into(), service_id.clone());
        let mut info = DeploymentInfo {
            image: service.image.clone(),
            replicas: service.replicas,
            ready_replicas: 0,
            available_replicas: 0,
            cpu: service.cpu.clone(),
            memory: service.memory.clone(),
            env: service.env.clone(),
            secret_refs: vec![secret_name],
            ports: service.ports.clone(),
            template_annotations: BTreeMap::new(),
        };
        let dep_ref =
            ObjectRef::namespaced(ObjectKind::Deployment, &spec.namespace, &service.name);
        if let Some(current) = self.gateway.get(&dep_ref).await? {
            // Carry over rollout state so a re-apply is not a restart.
            meta.resource_version = current.meta.resource_version.clone();
            if let Some(live) = current.as_deployment() {
                info.template_annotations = live.template_annotations.clone();
                info.ready_replicas = live.ready_replicas;
                info.available_replicas = live.available_replicas;
            }
        }
        self.gateway
            .apply(ClusterObject::new(meta, ObjectPayload::Deployment(info)))
            .await?;

        if !service.ports.is_empty() {
            let mut meta = self.child_meta(spec, &service.name);
            meta.labels.insert(label::APP.into(), service.name.clone());
            let selector = string_map(&[(label::APP, &service.name)]);
            self.gateway
                .apply(ClusterObject::new(
                    meta,
                    ObjectPayload::Service {
                        selector,
                        ports: service.ports.clone(),
                    },
                ))
                .await?;
        }
        Ok(seeded)
    }
}

#[async_trait]
impl Provisioner for ManifestProvisioner {
    async fn apply(&self, spec: &EnvironmentSpec) -> ProvisionResult<Provisioned> {
        self.apply_namespace(spec).await?;
        self.apply_scaffold(spec).await?;

        let mut seeded_secrets = Vec::new();
        for service in &spec.services {
            if self.apply_service(spec, service).await? {
                seeded_secrets.push(spec.service_id(&service.name));
            }
        }
        info!(
            environment = %spec.environment_id,
            namespace = %spec.namespace,
            services = spec.services.len(),
            seeded = seeded_secrets.len(),
            "environment applied"
        );
        Ok(Provisioned {
            environment_id: spec.environment_id.clone(),
            namespace: spec.namespace.clone(),
            seeded_secrets,
        })
    }

    async fn destroy(&self, record: &EnvironmentRecord) -> ProvisionResult<()> {
        let reference = ObjectRef::cluster(ObjectKind::Namespace, &record.namespace);
        match self.gateway.delete(&reference).await? {
            DeleteOutcome::Deleted => {
                info!(
                    environment = %record.environment_id,
                    namespace = %record.namespace,
                    "environment destroyed"
                );
            }
            DeleteOutcome::AlreadyAbsent => {
                debug!(
                    environment = %record.environment_id,
                    namespace = %record.namespace,
                    "namespace already absent"
                );
            }
        }
        Ok(())
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
