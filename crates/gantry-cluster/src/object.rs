//! Typed view of the Kubernetes objects the control plane manages.
//!
//! Gateway implementations translate between these types and the wire
//! representation. Only the fields the control plane reasons about are
//! modelled; callers that need a partial update read the current object,
//! modify it, and apply it back.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ── Kinds and references ──────────────────────────────────────────

/// The object kinds the gateway can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Namespace,
    ResourceQuota,
    LimitRange,
    ServiceAccount,
    RoleBinding,
    Secret,
    Deployment,
    Service,
    /// Pods are read-only: listed for observability, never written.
    Pod,
}

impl ObjectKind {
    /// Cluster-scoped kinds have no namespace in their reference.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ObjectKind::Namespace)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::ResourceQuota => "resourcequota",
            ObjectKind::LimitRange => "limitrange",
            ObjectKind::ServiceAccount => "serviceaccount",
            ObjectKind::RoleBinding => "rolebinding",
            ObjectKind::Secret => "secret",
            ObjectKind::Deployment => "deployment",
            ObjectKind::Service => "service",
            ObjectKind::Pod => "pod",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a single object: kind + namespace (if namespaced) + name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespaced(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: ObjectKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// Object metadata: identity, labels, annotations, and the concurrency
/// token used for conflict-checked writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// `Some` on objects read from the cluster. An apply that carries a
    /// stale version is rejected with `ClusterError::Conflict`; `None`
    /// applies unconditionally (upsert).
    pub resource_version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// `Some` while the object is being torn down by the cluster.
    pub deleting_since: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

// ── Secret material ───────────────────────────────────────────────

/// Character set for generated secret material.
const VALUE_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Length of generated secret values, seeding and rotation alike.
pub const SECRET_VALUE_LENGTH: usize = 32;

/// A secret value that never leaves the gateway boundary.
///
/// `Debug` is redacted, there is no `Display` and no serde support, and
/// the buffer is zeroed on drop. Gateway implementations call [`reveal`]
/// to encode the value onto the wire; nothing else should.
///
/// [`reveal`]: SecretValue::reveal
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a new random value of `length` characters from the OS
    /// CSPRNG.
    pub fn generate(length: usize) -> Self {
        let mut rng = OsRng;
        let value: String = (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..VALUE_CHARSET.len());
                VALUE_CHARSET[idx] as char
            })
            .collect();
        Self(value)
    }

    /// Expose the raw value for wire encoding.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([redacted])")
    }
}

// ── Payloads ──────────────────────────────────────────────────────

/// Kind-specific object content.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPayload {
    Namespace,
    ResourceQuota {
        /// Hard limits, e.g. `requests.cpu` -> `4`.
        hard: BTreeMap<String, String>,
    },
    LimitRange {
        default_limits: BTreeMap<String, String>,
        default_requests: BTreeMap<String, String>,
    },
    ServiceAccount,
    RoleBinding {
        service_account: String,
        /// Name of the ClusterRole granted inside the namespace.
        role: String,
    },
    Secret {
        data: BTreeMap<String, SecretValue>,
    },
    Deployment(DeploymentInfo),
    Service {
        selector: BTreeMap<String, String>,
        ports: Vec<u16>,
    },
    Pod {
        phase: String,
        ready: bool,
    },
}

impl ObjectPayload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectPayload::Namespace => ObjectKind::Namespace,
            ObjectPayload::ResourceQuota { .. } => ObjectKind::ResourceQuota,
            ObjectPayload::LimitRange { .. } => ObjectKind::LimitRange,
            ObjectPayload::ServiceAccount => ObjectKind::ServiceAccount,
            ObjectPayload::RoleBinding { .. } => ObjectKind::RoleBinding,
            ObjectPayload::Secret { .. } => ObjectKind::Secret,
            ObjectPayload::Deployment(_) => ObjectKind::Deployment,
            ObjectPayload::Service { .. } => ObjectKind::Service,
            ObjectPayload::Pod { .. } => ObjectKind::Pod,
        }
    }
}

/// Deployment spec and observed rollout state, merged into one view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeploymentInfo {
    pub image: String,
    pub replicas: u32,
    /// Observed counts; zero until the cluster reports status.
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub cpu: String,
    pub memory: String,
    pub env: BTreeMap<String, String>,
    /// Secrets the pod spec consumes, however mounted (env-from, env
    /// value-from, volumes).
    pub secret_refs: Vec<String>,
    pub ports: Vec<u16>,
    /// Pod template annotations; bumping one forces a rolling restart.
    pub template_annotations: BTreeMap<String, String>,
}

impl DeploymentInfo {
    /// Whether this deployment consumes the named secret.
    pub fn references_secret(&self, secret_name: &str) -> bool {
        self.secret_refs.iter().any(|s| s == secret_name)
    }
}

// ── Objects ───────────────────────────────────────────────────────

/// A single cluster object: metadata plus kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterObject {
    pub meta: ObjectMeta,
    pub payload: ObjectPayload,
}

impl ClusterObject {
    pub fn new(meta: ObjectMeta, payload: ObjectPayload) -> Self {
        Self { meta, payload }
    }

    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind(),
            namespace: self.meta.namespace.clone(),
            name: self.meta.name.clone(),
        }
    }

    pub fn as_secret_data(&self) -> Option<&BTreeMap<String, SecretValue>> {
        match &self.payload {
            ObjectPayload::Secret { data } => Some(data),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&DeploymentInfo> {
        match &self.payload {
            ObjectPayload::Deployment(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_value_debug_is_redacted() {
        let value = SecretValue::new("super-sensitive");
        assert_eq!(format!("{value:?}"), "SecretValue([redacted])");
    }

    #[test]
    fn generated_values_use_charset_and_length() {
        let value = SecretValue::generate(32);
        assert_eq!(value.len(), 32);
        assert!(
            value
                .reveal()
                .bytes()
                .all(|b| VALUE_CHARSET.contains(&b))
        );
    }

    #[test]
    fn generated_values_differ() {
        let a = SecretValue::generate(32);
        let b = SecretValue::generate(32);
        assert_ne!(a, b);
    }

    #[test]
    fn object_ref_display_includes_namespace() {
        let r = ObjectRef::namespaced(ObjectKind::Secret, "dev", "api-secrets");
        assert_eq!(r.to_string(), "secret dev/api-secrets");
        let n = ObjectRef::cluster(ObjectKind::Namespace, "dev");
        assert_eq!(n.to_string(), "namespace dev");
    }

    #[test]
    fn deployment_secret_reference_check() {
        let info = DeploymentInfo {
            secret_refs: vec!["api-secrets".to_string()],
            ..Default::default()
        };
        assert!(info.references_secret("api-secrets"));
        assert!(!info.references_secret("other"));
    }
}
