//! Domain records derived from cluster object metadata.
//!
//! Nothing here is persisted anywhere else: every record is rebuilt from
//! the labels and annotations of the objects themselves, so a restart
//! recovers the full working set by listing managed objects.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use gantry_cluster::{ClusterObject, ObjectKind, annotation, label};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Globally unique environment identifier (`env-` + uuid fragment).
pub type EnvironmentId = String;

/// Service identifier, `<environment_id>-<service_name>`.
pub type ServiceId = String;

pub const MIN_TTL_HOURS: u32 = 1;
pub const MAX_TTL_HOURS: u32 = 168;
pub const DEFAULT_TTL_HOURS: u32 = 24;

const MAX_NAME_LEN: usize = 63;
const MAX_REPLICAS: u32 = 100;

// ── Environments ──────────────────────────────────────────────────

/// Lifecycle state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Creating,
    Active,
    Expiring,
    Expired,
    Deleted,
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::Creating => "creating",
            EnvironmentStatus::Active => "active",
            EnvironmentStatus::Expiring => "expiring",
            EnvironmentStatus::Expired => "expired",
            EnvironmentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "creating" => Some(EnvironmentStatus::Creating),
            "active" => Some(EnvironmentStatus::Active),
            "expiring" => Some(EnvironmentStatus::Expiring),
            "expired" => Some(EnvironmentStatus::Expired),
            "deleted" => Some(EnvironmentStatus::Deleted),
            _ => None,
        }
    }

    /// Deleted is terminal; no further transitions apply.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvironmentStatus::Deleted)
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An environment as recorded on its namespace object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub environment_id: EnvironmentId,
    pub name: String,
    pub namespace: String,
    pub ttl_hours: u32,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation; never recomputed.
    pub expires_at: DateTime<Utc>,
    /// User-supplied labels, system labels stripped.
    pub labels: BTreeMap<String, String>,
    pub services: Vec<ServiceId>,
    pub status: EnvironmentStatus,
    /// Set once a cleanup attempt has failed; the environment shows as
    /// "expired, cleanup pending" instead of silently stuck.
    pub cleanup_pending: bool,
}

const SYSTEM_LABELS: &[&str] = &[
    label::MANAGED_BY,
    label::ENVIRONMENT_ID,
    label::TTL_HOURS,
    label::EXPIRES_AT,
    label::TEMPORARY_ENVIRONMENT,
    label::ENVIRONMENT_STATUS,
];

impl EnvironmentRecord {
    /// Derive a record from a managed namespace object.
    pub fn from_object(obj: &ClusterObject) -> StoreResult<Self> {
        if obj.kind() != ObjectKind::Namespace {
            return Err(StoreError::Malformed(format!(
                "expected a namespace, got {}",
                obj.kind()
            )));
        }
        let meta = &obj.meta;
        let environment_id = meta
            .label(label::ENVIRONMENT_ID)
            .ok_or_else(|| missing(&meta.name, label::ENVIRONMENT_ID))?
            .to_string();
        let ttl_hours: u32 = meta
            .label(label::TTL_HOURS)
            .ok_or_else(|| missing(&meta.name, label::TTL_HOURS))?
            .parse()
            .map_err(|_| {
                StoreError::Malformed(format!("{}: unparseable ttl-hours label", meta.name))
            })?;
        let created_at = parse_rfc3339(meta.annotation(annotation::CREATED_AT))
            .or(meta.created_at)
            .ok_or_else(|| missing(&meta.name, annotation::CREATED_AT))?;
        let expires_at = parse_rfc3339(meta.annotation(annotation::EXPIRES_AT))
            .or_else(|| parse_epoch(meta.label(label::EXPIRES_AT)))
            .ok_or_else(|| missing(&meta.name, annotation::EXPIRES_AT))?;

        let status = if meta.deleting_since.is_some() {
            EnvironmentStatus::Deleted
        } else {
            meta.label(label::ENVIRONMENT_STATUS)
                .and_then(EnvironmentStatus::parse)
                .unwrap_or(EnvironmentStatus::Creating)
        };

        let services = meta
            .annotation(annotation::SERVICES)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let labels = meta
            .labels
            .iter()
            .filter(|(k, _)| !SYSTEM_LABELS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            environment_id,
            name: meta
                .annotation(annotation::ENVIRONMENT_NAME)
                .unwrap_or(&meta.name)
                .to_string(),
            namespace: meta.name.clone(),
            ttl_hours,
            created_at,
            expires_at,
            labels,
            services,
            status,
            cleanup_pending: meta.annotation(annotation::CLEANUP_PENDING).is_some(),
        })
    }
}

fn missing(object: &str, key: &str) -> StoreError {
    StoreError::Malformed(format!("{object}: missing {key}"))
}

fn parse_rfc3339(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_epoch(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Expiry as a pure function of creation time and TTL. Feeding the same
/// inputs always yields the same instant.
pub fn expires_at_for(created_at: DateTime<Utc>, ttl_hours: u32) -> DateTime<Utc> {
    created_at + Duration::hours(i64::from(ttl_hours))
}

// ── Secrets ───────────────────────────────────────────────────────

/// One rotation, as appended to the secret's history annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonically increasing per secret.
    pub version: u64,
    pub rotated_at: DateTime<Utc>,
    pub rotated_by: String,
}

/// Secret metadata: key names and rotation history, never values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub service_id: ServiceId,
    pub secret_name: String,
    pub namespace: String,
    pub secret_type: String,
    pub keys: Vec<String>,
    pub last_rotated: Option<DateTime<Utc>>,
    pub rotation_history: Vec<HistoryEntry>,
}

impl SecretRecord {
    /// Derive a record from a managed secret object. Values stay behind;
    /// only key names cross.
    pub fn from_object(obj: &ClusterObject) -> StoreResult<Self> {
        if obj.kind() != ObjectKind::Secret {
            return Err(StoreError::Malformed(format!(
                "expected a secret, got {}",
                obj.kind()
            )));
        }
        let meta = &obj.meta;
        let service_id = meta
            .label(label::SERVICE_ID)
            .ok_or_else(|| missing(&meta.name, label::SERVICE_ID))?
            .to_string();
        let namespace = meta
            .namespace
            .clone()
            .ok_or_else(|| missing(&meta.name, "namespace"))?;
        let mut keys: Vec<String> = obj
            .as_secret_data()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();

        let rotation_history = parse_history(meta.annotation(annotation::ROTATION_HISTORY))?;
        Ok(Self {
            service_id,
            secret_name: meta.name.clone(),
            namespace,
            secret_type: meta
                .annotation(annotation::SECRET_TYPE)
                .unwrap_or("opaque")
                .to_string(),
            keys,
            last_rotated: rotation_history.last().map(|e| e.rotated_at),
            rotation_history,
        })
    }

    /// Highest version in the history, zero when empty.
    pub fn latest_version(&self) -> u64 {
        self.rotation_history
            .iter()
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }
}

/// Parse the history annotation; a missing annotation is an empty
/// history, a present-but-garbled one is malformed.
pub fn parse_history(raw: Option<&str>) -> StoreResult<Vec<HistoryEntry>> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| StoreError::Malformed(format!("rotation history: {e}"))),
    }
}

// ── Desired state ─────────────────────────────────────────────────

/// A service to provision inside an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

fn default_replicas() -> u32 {
    1
}

fn default_cpu() -> String {
    "100m".to_string()
}

fn default_memory() -> String {
    "128Mi".to_string()
}

impl ServiceSpec {
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid(format!(
                "service name must be 1-{MAX_NAME_LEN} characters"
            )));
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(StoreError::Invalid(format!(
                "service name {:?} must be lowercase alphanumeric or '-'",
                self.name
            )));
        }
        if self.image.is_empty() {
            return Err(StoreError::Invalid("service image must not be empty".to_string()));
        }
        if self.replicas == 0 || self.replicas > MAX_REPLICAS {
            return Err(StoreError::Invalid(format!(
                "replicas must be 1-{MAX_REPLICAS}"
            )));
        }
        Ok(())
    }
}

/// Desired state for one environment, as handed to the provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub environment_id: EnvironmentId,
    pub name: String,
    pub namespace: String,
    pub ttl_hours: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub services: Vec<ServiceSpec>,
}

impl EnvironmentSpec {
    /// Validate a creation request and fix its identity, namespace, and
    /// expiry. `expires_at` is sealed here and never changes afterwards.
    pub fn create(
        name: &str,
        ttl_hours: u32,
        labels: BTreeMap<String, String>,
        services: Vec<ServiceSpec>,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        validate_environment_name(name)?;
        validate_ttl(ttl_hours)?;
        let mut seen = std::collections::BTreeSet::new();
        for service in &services {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(StoreError::Invalid(format!(
                    "duplicate service name {:?}",
                    service.name
                )));
            }
        }
        let environment_id = generate_environment_id();
        let namespace = namespace_for(name, &environment_id);
        Ok(Self {
            environment_id,
            name: name.to_string(),
            namespace,
            ttl_hours,
            created_at: now,
            expires_at: expires_at_for(now, ttl_hours),
            labels,
            services,
        })
    }

    pub fn service_id(&self, service_name: &str) -> ServiceId {
        format!("{}-{}", self.environment_id, service_name)
    }
}

pub fn validate_environment_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StoreError::Invalid(format!(
            "environment name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_ttl(ttl_hours: u32) -> StoreResult<()> {
    if !(MIN_TTL_HOURS..=MAX_TTL_HOURS).contains(&ttl_hours) {
        return Err(StoreError::Invalid(format!(
            "ttl_hours must be {MIN_TTL_HOURS}-{MAX_TTL_HOURS}, got {ttl_hours}"
        )));
    }
    Ok(())
}

fn generate_environment_id() -> EnvironmentId {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("env-{}", &uuid[..8])
}

/// DNS-label-safe namespace name: slug of the display name plus the id
/// fragment, capped at 63 characters.
pub fn namespace_for(name: &str, environment_id: &str) -> String {
    let suffix = environment_id.strip_prefix("env-").unwrap_or(environment_id);
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.to_ascii_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let budget = MAX_NAME_LEN - suffix.len() - 1;
    let slug = if slug.is_empty() {
        "env"
    } else {
        &slug[..slug.len().min(budget)]
    };
    format!("{}-{}", slug.trim_end_matches('-'), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_cluster::{ObjectMeta, ObjectPayload, SecretValue};

    fn managed_namespace(id: &str) -> ClusterObject {
        let mut meta = ObjectMeta::named("demo-a1b2c3d4");
        meta.labels.insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels.insert(label::ENVIRONMENT_ID.into(), id.into());
        meta.labels.insert(label::TTL_HOURS.into(), "24".into());
        meta.labels
            .insert(label::ENVIRONMENT_STATUS.into(), "active".into());
        meta.annotations.insert(
            annotation::CREATED_AT.into(),
            "2026-03-01T10:00:00Z".into(),
        );
        meta.annotations.insert(
            annotation::EXPIRES_AT.into(),
            "2026-03-02T10:00:00Z".into(),
        );
        meta.annotations
            .insert(annotation::ENVIRONMENT_NAME.into(), "Demo".into());
        ClusterObject::new(meta, ObjectPayload::Namespace)
    }

    #[test]
    fn environment_record_parses_labels_and_annotations() {
        let record = EnvironmentRecord::from_object(&managed_namespace("env-a1b2c3d4")).unwrap();
        assert_eq!(record.environment_id, "env-a1b2c3d4");
        assert_eq!(record.name, "Demo");
        assert_eq!(record.namespace, "demo-a1b2c3d4");
        assert_eq!(record.ttl_hours, 24);
        assert_eq!(record.status, EnvironmentStatus::Active);
        assert_eq!(
            record.expires_at,
            expires_at_for(record.created_at, record.ttl_hours)
        );
        assert!(record.labels.is_empty());
    }

    #[test]
    fn missing_environment_id_is_malformed() {
        let mut obj = managed_namespace("env-x");
        obj.meta.labels.remove(label::ENVIRONMENT_ID);
        assert!(matches!(
            EnvironmentRecord::from_object(&obj),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn deleting_namespace_reads_as_deleted() {
        let mut obj = managed_namespace("env-x");
        obj.meta.deleting_since = Some(Utc::now());
        let record = EnvironmentRecord::from_object(&obj).unwrap();
        assert_eq!(record.status, EnvironmentStatus::Deleted);
    }

    #[test]
    fn expiry_derivation_is_idempotent() {
        let created = "2026-03-01T10:00:00Z".parse().unwrap();
        let first = expires_at_for(created, 24);
        let second = expires_at_for(created, 24);
        assert_eq!(first, second);
        assert_eq!(first, "2026-03-02T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn secret_record_exposes_keys_never_values() {
        let mut meta = ObjectMeta::namespaced("demo-ns", "env-1-api-secrets");
        meta.labels
            .insert(label::SERVICE_ID.into(), "env-1-api".into());
        meta.annotations.insert(
            annotation::ROTATION_HISTORY.into(),
            r#"[{"version":1,"rotated_at":"2026-03-01T10:00:00Z","rotated_by":"provisioner"}]"#
                .into(),
        );
        let data = [
            ("api_key".to_string(), SecretValue::new("v1")),
            ("database_url".to_string(), SecretValue::new("v2")),
        ]
        .into_iter()
        .collect();
        let obj = ClusterObject::new(meta, ObjectPayload::Secret { data });

        let record = SecretRecord::from_object(&obj).unwrap();
        assert_eq!(record.keys, vec!["api_key", "database_url"]);
        assert_eq!(record.latest_version(), 1);
        assert_eq!(record.last_rotated, record.rotation_history[0].rotated_at.into());
        let dumped = serde_json::to_string(&record).unwrap();
        assert!(!dumped.contains("\"v1\"") && !dumped.contains("\"v2\""));
    }

    #[test]
    fn garbled_history_annotation_is_malformed() {
        assert!(parse_history(Some("not-json")).is_err());
        assert_eq!(parse_history(None).unwrap(), Vec::new());
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        assert!(validate_ttl(MIN_TTL_HOURS).is_ok());
        assert!(validate_ttl(MAX_TTL_HOURS).is_ok());
        assert!(validate_ttl(0).is_err());
        assert!(validate_ttl(MAX_TTL_HOURS + 1).is_err());
    }

    #[test]
    fn service_spec_validation() {
        let mut spec = ServiceSpec {
            name: "api".into(),
            image: "nginx:1.27".into(),
            replicas: 1,
            cpu: default_cpu(),
            memory: default_memory(),
            env: BTreeMap::new(),
            ports: vec![8080],
        };
        assert!(spec.validate().is_ok());

        spec.replicas = 0;
        assert!(spec.validate().is_err());
        spec.replicas = 1;
        spec.name = "Bad_Name".into();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn namespace_name_is_dns_safe_and_bounded() {
        let ns = namespace_for("My Test Env!", "env-a1b2c3d4");
        assert_eq!(ns, "my-test-env-a1b2c3d4");

        let long = "x".repeat(80);
        let ns = namespace_for(&long, "env-a1b2c3d4");
        assert!(ns.len() <= 63);
        assert!(ns.ends_with("-a1b2c3d4"));
    }

    #[test]
    fn environment_spec_seals_expiry_at_creation() {
        let now = Utc::now();
        let spec =
            EnvironmentSpec::create("demo", 48, BTreeMap::new(), Vec::new(), now).unwrap();
        assert_eq!(spec.expires_at, now + Duration::hours(48));
        assert!(spec.environment_id.starts_with("env-"));
        assert!(spec.namespace.starts_with("demo-"));
    }

    #[test]
    fn duplicate_service_names_rejected() {
        let svc = ServiceSpec {
            name: "api".into(),
            image: "nginx".into(),
            replicas: 1,
            cpu: default_cpu(),
            memory: default_memory(),
            env: BTreeMap::new(),
            ports: Vec::new(),
        };
        let err = EnvironmentSpec::create(
            "demo",
            24,
            BTreeMap::new(),
            vec![svc.clone(), svc],
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
