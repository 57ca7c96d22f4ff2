//! kube-backed gateway implementation.
//!
//! Translates between the typed object model and the wire types, with a
//! bounded timeout on every call. Upserts go through a merge patch so
//! fields outside the model are left untouched; a missing object falls
//! back to create. A patch body carrying a resource version gets the API
//! server's optimistic concurrency check, surfaced as `Conflict`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, LimitRange, LimitRangeItem, LimitRangeSpec,
    Namespace, Pod, PodSpec, PodTemplateSpec, ResourceQuota, ResourceQuotaSpec,
    ResourceRequirements, Secret, SecretEnvSource, Service, ServiceAccount, ServicePort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector as WireLabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as WireMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::gateway::{ClusterGateway, DeleteOutcome};
use crate::labels::{LabelSelector, annotation, label};
use crate::object::{
    ClusterObject, DeploymentInfo, ObjectKind, ObjectMeta, ObjectPayload, ObjectRef, SecretValue,
};

/// Field manager reported on writes.
const FIELD_MANAGER: &str = "gantry";

/// `ClusterGateway` backed by a real API server.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    timeout: Duration,
}

impl KubeGateway {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn connect(timeout: Duration) -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Connect(e.to_string()))?;
        Ok(Self::new(client, timeout))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn scoped<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Run a kube call under the configured timeout. The outer error is
    /// the timeout; the inner result is the call's own outcome.
    async fn call<T, F>(&self, what: &str, fut: F) -> ClusterResult<Result<T, kube::Error>>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ClusterError::Timeout(what.to_string()))
    }

    async fn fetch<K>(&self, api: Api<K>, reference: &ObjectRef) -> ClusterResult<Option<K>>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        let what = format!("get {reference}");
        self.call(&what, api.get_opt(&reference.name))
            .await?
            .map_err(|e| map_kube_error(&what, e))
    }

    /// Merge-patch the desired state; create on 404.
    async fn push<K>(&self, api: Api<K>, body: K, reference: &ObjectRef) -> ClusterResult<K>
    where
        K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    {
        let what = format!("apply {reference}");
        let params = PatchParams::apply(FIELD_MANAGER);
        let patched = self
            .call(
                &what,
                api.patch(&reference.name, &params, &Patch::Merge(&body)),
            )
            .await?;
        match patched {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(object = %reference, "not present, creating");
                let what = format!("create {reference}");
                self.call(&what, api.create(&PostParams::default(), &body))
                    .await?
                    .map_err(|e| map_kube_error(&what, e))
            }
            Err(e) => Err(map_kube_error(&what, e)),
        }
    }

    async fn remove<K>(&self, api: Api<K>, reference: &ObjectRef) -> ClusterResult<DeleteOutcome>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        let what = format!("delete {reference}");
        let outcome = self
            .call(&what, api.delete(&reference.name, &DeleteParams::default()))
            .await?;
        match outcome {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(map_kube_error(&what, e)),
        }
    }

    async fn query<K>(
        &self,
        api: Api<K>,
        kind: ObjectKind,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<K>>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }
        let what = format!("list {kind}");
        let list = self
            .call(&what, api.list(&params))
            .await?
            .map_err(|e| map_kube_error(&what, e))?;
        Ok(list.items)
    }
}

fn map_kube_error(what: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(e) if e.code == 409 => ClusterError::Conflict(what.to_string()),
        other => ClusterError::Api(format!("{what}: {other}")),
    }
}

fn require_namespace(reference: &ObjectRef) -> ClusterResult<&str> {
    reference.namespace.as_deref().ok_or_else(|| {
        ClusterError::InvalidRef(format!("{} requires a namespace", reference.kind))
    })
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn get(&self, reference: &ObjectRef) -> ClusterResult<Option<ClusterObject>> {
        if reference.kind.is_namespaced() {
            require_namespace(reference)?;
        }
        let ns = reference.namespace.as_deref();
        Ok(match reference.kind {
            ObjectKind::Namespace => self
                .fetch(self.namespaces(), reference)
                .await?
                .map(decode_namespace),
            ObjectKind::ResourceQuota => self
                .fetch(self.scoped::<ResourceQuota>(ns), reference)
                .await?
                .map(decode_quota),
            ObjectKind::LimitRange => self
                .fetch(self.scoped::<LimitRange>(ns), reference)
                .await?
                .map(decode_limit_range),
            ObjectKind::ServiceAccount => self
                .fetch(self.scoped::<ServiceAccount>(ns), reference)
                .await?
                .map(decode_service_account),
            ObjectKind::RoleBinding => self
                .fetch(self.scoped::<RoleBinding>(ns), reference)
                .await?
                .map(decode_role_binding),
            ObjectKind::Secret => self
                .fetch(self.scoped::<Secret>(ns), reference)
                .await?
                .map(decode_secret),
            ObjectKind::Deployment => self
                .fetch(self.scoped::<Deployment>(ns), reference)
                .await?
                .map(decode_deployment),
            ObjectKind::Service => self
                .fetch(self.scoped::<Service>(ns), reference)
                .await?
                .map(decode_service),
            ObjectKind::Pod => self
                .fetch(self.scoped::<Pod>(ns), reference)
                .await?
                .map(decode_pod),
        })
    }

    async fn apply(&self, object: ClusterObject) -> ClusterResult<ClusterObject> {
        let reference = object.object_ref();
        if reference.kind.is_namespaced() {
            require_namespace(&reference)?;
        }
        let ns = reference.namespace.as_deref();
        match &object.payload {
            ObjectPayload::Namespace => {
                let body = encode_namespace(&object);
                let stored = self.push(self.namespaces(), body, &reference).await?;
                Ok(decode_namespace(stored))
            }
            ObjectPayload::ResourceQuota { hard } => {
                let body = encode_quota(&object, hard);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_quota(stored))
            }
            ObjectPayload::LimitRange {
                default_limits,
                default_requests,
            } => {
                let body = encode_limit_range(&object, default_limits, default_requests);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_limit_range(stored))
            }
            ObjectPayload::ServiceAccount => {
                let body = encode_service_account(&object);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_service_account(stored))
            }
            ObjectPayload::RoleBinding {
                service_account,
                role,
            } => {
                let body = encode_role_binding(&object, service_account, role);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_role_binding(stored))
            }
            ObjectPayload::Secret { data } => {
                let body = encode_secret(&object, data);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_secret(stored))
            }
            ObjectPayload::Deployment(info) => {
                let body = encode_deployment(&object, info);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_deployment(stored))
            }
            ObjectPayload::Service { selector, ports } => {
                let body = encode_service(&object, selector, ports);
                let stored = self.push(self.scoped(ns), body, &reference).await?;
                Ok(decode_service(stored))
            }
            ObjectPayload::Pod { .. } => {
                Err(ClusterError::InvalidRef("pods are read-only".to_string()))
            }
        }
    }

    async fn delete(&self, reference: &ObjectRef) -> ClusterResult<DeleteOutcome> {
        if reference.kind.is_namespaced() {
            require_namespace(reference)?;
        }
        let ns = reference.namespace.as_deref();
        match reference.kind {
            ObjectKind::Namespace => self.remove(self.namespaces(), reference).await,
            ObjectKind::ResourceQuota => self.remove(self.scoped::<ResourceQuota>(ns), reference).await,
            ObjectKind::LimitRange => self.remove(self.scoped::<LimitRange>(ns), reference).await,
            ObjectKind::ServiceAccount => {
                self.remove(self.scoped::<ServiceAccount>(ns), reference).await
            }
            ObjectKind::RoleBinding => self.remove(self.scoped::<RoleBinding>(ns), reference).await,
            ObjectKind::Secret => self.remove(self.scoped::<Secret>(ns), reference).await,
            ObjectKind::Deployment => self.remove(self.scoped::<Deployment>(ns), reference).await,
            ObjectKind::Service => self.remove(self.scoped::<Service>(ns), reference).await,
            ObjectKind::Pod => Err(ClusterError::InvalidRef("pods are read-only".to_string())),
        }
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>> {
        Ok(match kind {
            ObjectKind::Namespace => self
                .query(self.namespaces(), kind, selector)
                .await?
                .into_iter()
                .map(decode_namespace)
                .collect(),
            ObjectKind::ResourceQuota => self
                .query(self.scoped::<ResourceQuota>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_quota)
                .collect(),
            ObjectKind::LimitRange => self
                .query(self.scoped::<LimitRange>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_limit_range)
                .collect(),
            ObjectKind::ServiceAccount => self
                .query(self.scoped::<ServiceAccount>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_service_account)
                .collect(),
            ObjectKind::RoleBinding => self
                .query(self.scoped::<RoleBinding>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_role_binding)
                .collect(),
            ObjectKind::Secret => self
                .query(self.scoped::<Secret>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_secret)
                .collect(),
            ObjectKind::Deployment => self
                .query(self.scoped::<Deployment>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_deployment)
                .collect(),
            ObjectKind::Service => self
                .query(self.scoped::<Service>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_service)
                .collect(),
            ObjectKind::Pod => self
                .query(self.scoped::<Pod>(namespace), kind, selector)
                .await?
                .into_iter()
                .map(decode_pod)
                .collect(),
        })
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        stamp: DateTime<Utc>,
    ) -> ClusterResult<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            (annotation::RESTARTED_AT): stamp.to_rfc3339()
                        }
                    }
                }
            }
        });
        let what = format!("restart deployment {namespace}/{name}");
        self.call(
            &what,
            api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)),
        )
        .await?
        .map_err(|e| map_kube_error(&what, e))?;
        Ok(())
    }

    async fn ping(&self) -> ClusterResult<()> {
        self.call("ping", self.client.apiserver_version())
            .await?
            .map_err(|e| map_kube_error("ping", e))?;
        Ok(())
    }
}

// ── Wire conversions ──────────────────────────────────────────────

fn decode_meta(meta: &WireMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        resource_version: meta.resource_version.clone(),
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
        deleting_since: meta.deletion_timestamp.as_ref().map(|t| t.0),
    }
}

fn encode_meta(meta: &ObjectMeta) -> WireMeta {
    WireMeta {
        name: Some(meta.name.clone()),
        namespace: meta.namespace.clone(),
        labels: some_if_nonempty(&meta.labels),
        annotations: some_if_nonempty(&meta.annotations),
        resource_version: meta.resource_version.clone(),
        ..Default::default()
    }
}

fn some_if_nonempty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn quantities(map: Option<BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect()
}

fn to_quantities(map: &BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    map.iter()
        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
        .collect()
}

fn decode_namespace(ns: Namespace) -> ClusterObject {
    ClusterObject::new(decode_meta(&ns.metadata), ObjectPayload::Namespace)
}

fn encode_namespace(obj: &ClusterObject) -> Namespace {
    Namespace {
        metadata: encode_meta(&obj.meta),
        spec: None,
        status: None,
    }
}

fn decode_quota(quota: ResourceQuota) -> ClusterObject {
    let hard = quantities(quota.spec.and_then(|s| s.hard));
    ClusterObject::new(
        decode_meta(&quota.metadata),
        ObjectPayload::ResourceQuota { hard },
    )
}

fn encode_quota(obj: &ClusterObject, hard: &BTreeMap<String, String>) -> ResourceQuota {
    ResourceQuota {
        metadata: encode_meta(&obj.meta),
        spec: Some(ResourceQuotaSpec {
            hard: Some(to_quantities(hard)),
            ..Default::default()
        }),
        status: None,
    }
}

fn decode_limit_range(lr: LimitRange) -> ClusterObject {
    let item = lr
        .spec
        .map(|s| s.limits)
        .unwrap_or_default()
        .into_iter()
        .next();
    let (default_limits, default_requests) = match item {
        Some(item) => (quantities(item.default), quantities(item.default_request)),
        None => Default::default(),
    };
    ClusterObject::new(
        decode_meta(&lr.metadata),
        ObjectPayload::LimitRange {
            default_limits,
            default_requests,
        },
    )
}

fn encode_limit_range(
    obj: &ClusterObject,
    default_limits: &BTreeMap<String, String>,
    default_requests: &BTreeMap<String, String>,
) -> LimitRange {
    LimitRange {
        metadata: encode_meta(&obj.meta),
        spec: Some(LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: "Container".to_string(),
                default: Some(to_quantities(default_limits)),
                default_request: Some(to_quantities(default_requests)),
                ..Default::default()
            }],
        }),
    }
}

fn decode_service_account(sa: ServiceAccount) -> ClusterObject {
    ClusterObject::new(decode_meta(&sa.metadata), ObjectPayload::ServiceAccount)
}

fn encode_service_account(obj: &ClusterObject) -> ServiceAccount {
    ServiceAccount {
        metadata: encode_meta(&obj.meta),
        ..Default::default()
    }
}

fn decode_role_binding(rb: RoleBinding) -> ClusterObject {
    let service_account = rb
        .subjects
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|s| s.name)
        .unwrap_or_default();
    let role = rb.role_ref.name;
    ClusterObject::new(
        decode_meta(&rb.metadata),
        ObjectPayload::RoleBinding {
            service_account,
            role,
        },
    )
}

fn encode_role_binding(obj: &ClusterObject, service_account: &str, role: &str) -> RoleBinding {
    RoleBinding {
        metadata: encode_meta(&obj.meta),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: obj.meta.namespace.clone(),
            ..Default::default()
        }]),
    }
}

fn decode_secret(secret: Secret) -> ClusterObject {
    let data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, ByteString(bytes))| {
            let value = String::from_utf8_lossy(&bytes).into_owned();
            (key, SecretValue::new(value))
        })
        .collect();
    ClusterObject::new(decode_meta(&secret.metadata), ObjectPayload::Secret { data })
}

fn encode_secret(obj: &ClusterObject, data: &BTreeMap<String, SecretValue>) -> Secret {
    Secret {
        metadata: encode_meta(&obj.meta),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.reveal().as_bytes().to_vec())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

fn decode_deployment(deployment: Deployment) -> ClusterObject {
    let meta = decode_meta(&deployment.metadata);
    let spec = deployment.spec.unwrap_or_default();
    let status = deployment.status.unwrap_or_default();
    let pod_spec = spec.template.spec.clone().unwrap_or_default();
    let container = pod_spec.containers.first();

    let env = container
        .and_then(|c| c.env.as_ref())
        .map(|vars| {
            vars.iter()
                .filter_map(|v| v.value.clone().map(|value| (v.name.clone(), value)))
                .collect()
        })
        .unwrap_or_default();
    let ports = container
        .and_then(|c| c.ports.as_ref())
        .map(|ports| ports.iter().map(|p| p.container_port as u16).collect())
        .unwrap_or_default();
    let resources = container.and_then(|c| c.resources.as_ref());
    let cpu = resource_value(resources, "cpu");
    let memory = resource_value(resources, "memory");

    let info = DeploymentInfo {
        image: container
            .and_then(|c| c.image.clone())
            .unwrap_or_default(),
        replicas: spec.replicas.unwrap_or(0).max(0) as u32,
        ready_replicas: status.ready_replicas.unwrap_or(0).max(0) as u32,
        available_replicas: status.available_replicas.unwrap_or(0).max(0) as u32,
        cpu,
        memory,
        env,
        secret_refs: collect_secret_refs(&pod_spec),
        ports,
        template_annotations: spec
            .template
            .metadata
            .and_then(|m| m.annotations)
            .unwrap_or_default(),
    };
    ClusterObject::new(meta, ObjectPayload::Deployment(info))
}

fn resource_value(resources: Option<&ResourceRequirements>, key: &str) -> String {
    resources
        .and_then(|r| {
            r.limits
                .as_ref()
                .and_then(|m| m.get(key))
                .or_else(|| r.requests.as_ref().and_then(|m| m.get(key)))
        })
        .map(|q| q.0.clone())
        .unwrap_or_default()
}

/// Every secret name the pod spec consumes, across init and regular
/// containers and all mount styles.
fn collect_secret_refs(pod: &PodSpec) -> Vec<String> {
    let mut refs = Vec::new();
    let containers = pod
        .containers
        .iter()
        .chain(pod.init_containers.iter().flatten());
    for container in containers {
        for source in container.env_from.iter().flatten() {
            if let Some(secret_ref) = &source.secret_ref {
                refs.push(secret_ref.name.clone());
            }
        }
        for var in container.env.iter().flatten() {
            if let Some(value_from) = &var.value_from
                && let Some(key_ref) = &value_from.secret_key_ref
            {
                refs.push(key_ref.name.clone());
            }
        }
    }
    for volume in pod.volumes.iter().flatten() {
        if let Some(source) = &volume.secret
            && let Some(name) = &source.secret_name
        {
            refs.push(name.clone());
        }
    }
    refs.sort();
    refs.dedup();
    refs
}

fn encode_deployment(obj: &ClusterObject, info: &DeploymentInfo) -> Deployment {
    let mut pod_labels = obj.meta.labels.clone();
    pod_labels.insert(label::APP.to_string(), obj.meta.name.clone());
    let selector_labels: BTreeMap<String, String> =
        [(label::APP.to_string(), obj.meta.name.clone())].into();

    let resource_map: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity(info.cpu.clone())),
        ("memory".to_string(), Quantity(info.memory.clone())),
    ]
    .into();

    let container = Container {
        name: obj.meta.name.clone(),
        image: Some(info.image.clone()),
        env: if info.env.is_empty() {
            None
        } else {
            Some(
                info.env
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.clone(),
                        value: Some(value.clone()),
                        value_from: None,
                    })
                    .collect(),
            )
        },
        env_from: if info.secret_refs.is_empty() {
            None
        } else {
            Some(
                info.secret_refs
                    .iter()
                    .map(|name| EnvFromSource {
                        secret_ref: Some(SecretEnvSource {
                            name: name.clone(),
                            optional: None,
                        }),
                        ..Default::default()
                    })
                    .collect(),
            )
        },
        ports: if info.ports.is_empty() {
            None
        } else {
            Some(
                info.ports
                    .iter()
                    .map(|p| ContainerPort {
                        container_port: *p as i32,
                        ..Default::default()
                    })
                    .collect(),
            )
        },
        resources: Some(ResourceRequirements {
            requests: Some(resource_map.clone()),
            limits: Some(resource_map),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: encode_meta(&obj.meta),
        spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
            replicas: Some(info.replicas as i32),
            selector: WireLabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(WireMeta {
                    labels: Some(pod_labels),
                    annotations: some_if_nonempty(&info.template_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn decode_service(service: Service) -> ClusterObject {
    let spec = service.spec.unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port as u16)
        .collect();
    ClusterObject::new(
        decode_meta(&service.metadata),
        ObjectPayload::Service {
            selector: spec.selector.unwrap_or_default(),
            ports,
        },
    )
}

fn encode_service(
    obj: &ClusterObject,
    selector: &BTreeMap<String, String>,
    ports: &[u16],
) -> Service {
    Service {
        metadata: encode_meta(&obj.meta),
        spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
            selector: Some(selector.clone()),
            ports: Some(
                ports
                    .iter()
                    .map(|p| ServicePort {
                        port: *p as i32,
                        target_port: Some(IntOrString::Int(*p as i32)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

fn decode_pod(pod: Pod) -> ClusterObject {
    let status = pod.status.unwrap_or_default();
    let ready = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    ClusterObject::new(
        decode_meta(&pod.metadata),
        ObjectPayload::Pod {
            phase: status.phase.unwrap_or_default(),
            ready,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_object(data: &[(&str, &str)]) -> ClusterObject {
        let data = data
            .iter()
            .map(|(k, v)| (k.to_string(), SecretValue::new(*v)))
            .collect();
        ClusterObject::new(
            ObjectMeta::namespaced("dev", "api-secrets"),
            ObjectPayload::Secret { data },
        )
    }

    #[test]
    fn secret_roundtrips_through_wire_form() {
        let obj = secret_object(&[("api_key", "abc123")]);
        let ObjectPayload::Secret { data } = &obj.payload else {
            unreachable!()
        };
        let wire = encode_secret(&obj, data);
        assert_eq!(wire.type_.as_deref(), Some("Opaque"));

        let decoded = decode_secret(wire);
        let values = decoded.as_secret_data().unwrap();
        assert_eq!(values["api_key"].reveal(), "abc123");
    }

    #[test]
    fn deployment_encode_carries_env_from_secret() {
        let info = DeploymentInfo {
            image: "nginx:1.27".to_string(),
            replicas: 2,
            cpu: "100m".to_string(),
            memory: "128Mi".to_string(),
            secret_refs: vec!["api-secrets".to_string()],
            ports: vec![8080],
            ..Default::default()
        };
        let obj = ClusterObject::new(
            ObjectMeta::namespaced("dev", "api"),
            ObjectPayload::Deployment(info.clone()),
        );
        let wire = encode_deployment(&obj, &info);

        let decoded = decode_deployment(wire);
        let roundtrip = decoded.as_deployment().unwrap();
        assert_eq!(roundtrip.image, "nginx:1.27");
        assert_eq!(roundtrip.replicas, 2);
        assert_eq!(roundtrip.secret_refs, vec!["api-secrets".to_string()]);
        assert_eq!(roundtrip.ports, vec![8080]);
    }

    #[test]
    fn secret_refs_collected_from_all_mount_styles() {
        use k8s_openapi::api::core::v1::{
            EnvVarSource, SecretKeySelector, SecretVolumeSource, Volume,
        };

        let pod = PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                env_from: Some(vec![EnvFromSource {
                    secret_ref: Some(SecretEnvSource {
                        name: "from-env-from".to_string(),
                        optional: None,
                    }),
                    ..Default::default()
                }]),
                env: Some(vec![EnvVar {
                    name: "TOKEN".to_string(),
                    value: None,
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            key: "token".to_string(),
                            name: "from-env-var".to_string(),
                            optional: None,
                        }),
                        ..Default::default()
                    }),
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "creds".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some("from-volume".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let refs = collect_secret_refs(&pod);
        assert_eq!(refs, vec!["from-env-from", "from-env-var", "from-volume"]);
    }
}
