//! ReconciliationStore: cluster-derived state cache for Gantry.
//!
//! There is no database. The cluster objects themselves, through their
//! labels and annotations, are the only record of what exists. `refresh`
//! rebuilds the in-memory snapshot by listing objects carrying the
//! `managed-by=gantry` label, so a crashed or restarted process recovers
//! everything it manages with a single pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use gantry_cluster::{ClusterGateway, LabelSelector, ObjectKind};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::types::{EnvironmentRecord, SecretRecord, ServiceId};

/// Counts from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub environments: usize,
    pub secrets: usize,
    /// Managed objects whose metadata could not be parsed. They stay in
    /// the cluster untouched but drop out of the snapshot.
    pub skipped: usize,
}

#[derive(Default)]
struct Snapshot {
    /// Keyed by environment id.
    environments: BTreeMap<String, EnvironmentRecord>,
    /// Keyed by service id. More than one entry under a key means the
    /// id is ambiguous and lookups must refuse to guess.
    secrets: BTreeMap<ServiceId, Vec<SecretRecord>>,
}

/// Thread-safe snapshot of everything Gantry manages, derived from the
/// cluster on demand.
#[derive(Clone)]
pub struct ReconciliationStore {
    gateway: Arc<dyn ClusterGateway>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl ReconciliationStore {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            gateway,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
        }
    }

    /// Rebuild the snapshot from the cluster. Malformed managed objects
    /// are logged and skipped rather than failing the whole pass.
    pub async fn refresh(&self) -> StoreResult<RefreshStats> {
        let selector = LabelSelector::managed();
        let namespaces = self
            .gateway
            .list(ObjectKind::Namespace, None, &selector)
            .await?;
        let secrets = self.gateway.list(ObjectKind::Secret, None, &selector).await?;

        let mut next = Snapshot::default();
        let mut stats = RefreshStats::default();
        for obj in &namespaces {
            match EnvironmentRecord::from_object(obj) {
                Ok(record) => {
                    next.environments
                        .insert(record.environment_id.clone(), record);
                    stats.environments += 1;
                }
                Err(err) => {
                    warn!(namespace = %obj.meta.name, %err, "skipping malformed environment");
                    stats.skipped += 1;
                }
            }
        }
        for obj in &secrets {
            match SecretRecord::from_object(obj) {
                Ok(record) => {
                    next.secrets
                        .entry(record.service_id.clone())
                        .or_default()
                        .push(record);
                    stats.secrets += 1;
                }
                Err(err) => {
                    warn!(secret = %obj.meta.name, %err, "skipping malformed secret");
                    stats.skipped += 1;
                }
            }
        }

        *self.snapshot.write().await = next;
        debug!(
            environments = stats.environments,
            secrets = stats.secrets,
            skipped = stats.skipped,
            "snapshot rebuilt"
        );
        Ok(stats)
    }

    /// All known environments, ordered by namespace.
    pub async fn environments(&self) -> Vec<EnvironmentRecord> {
        let snapshot = self.snapshot.read().await;
        let mut records: Vec<_> = snapshot.environments.values().cloned().collect();
        records.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        records
    }

    /// Look up one environment by id.
    pub async fn environment(&self, environment_id: &str) -> Option<EnvironmentRecord> {
        self.snapshot
            .read()
            .await
            .environments
            .get(environment_id)
            .cloned()
    }

    /// All known secrets, ordered by service id.
    pub async fn secrets(&self) -> Vec<SecretRecord> {
        self.snapshot
            .read()
            .await
            .secrets
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Look up the secret for a service id. Two managed secrets claiming
    /// the same id is a configuration fault the caller must see.
    pub async fn secret(&self, service_id: &str) -> StoreResult<Option<SecretRecord>> {
        let snapshot = self.snapshot.read().await;
        match snapshot.secrets.get(service_id).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([one]) => Ok(Some(one.clone())),
            Some(many) => Err(StoreError::AmbiguousServiceId {
                service_id: service_id.to_string(),
                count: many.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnvironmentStatus;
    use gantry_cluster::{
        ClusterObject, FakeCluster, ObjectMeta, ObjectPayload, SecretValue, annotation, label,
    };

    fn managed_namespace(id: &str, name: &str) -> ClusterObject {
        let mut meta = ObjectMeta::named(name);
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels.insert(label::ENVIRONMENT_ID.into(), id.into());
        meta.labels.insert(label::TTL_HOURS.into(), "24".into());
        meta.labels
            .insert(label::ENVIRONMENT_STATUS.into(), "active".into());
        meta.annotations
            .insert(annotation::CREATED_AT.into(), "2026-03-01T10:00:00Z".into());
        meta.annotations
            .insert(annotation::EXPIRES_AT.into(), "2026-03-02T10:00:00Z".into());
        ClusterObject::new(meta, ObjectPayload::Namespace)
    }

    fn managed_secret(service_id: &str, namespace: &str) -> ClusterObject {
        let mut meta = ObjectMeta::namespaced(namespace, &format!("{service_id}-secrets"));
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels
            .insert(label::SERVICE_ID.into(), service_id.into());
        let data = [("api_key".to_string(), SecretValue::new("s3cret"))]
            .into_iter()
            .collect();
        ClusterObject::new(meta, ObjectPayload::Secret { data })
    }

    async fn seeded_store(fake: &FakeCluster) -> ReconciliationStore {
        ReconciliationStore::new(Arc::new(fake.clone()))
    }

    #[tokio::test]
    async fn refresh_rebuilds_from_cluster_labels() {
        let fake = FakeCluster::default();
        fake.apply(managed_namespace("env-aaaa1111", "alpha-aaaa1111"))
            .await
            .unwrap();
        fake.apply(managed_namespace("env-bbbb2222", "beta-bbbb2222"))
            .await
            .unwrap();
        fake.apply(managed_secret("env-aaaa1111-api", "alpha-aaaa1111"))
            .await
            .unwrap();

        let store = seeded_store(&fake).await;
        let stats = store.refresh().await.unwrap();
        assert_eq!(stats.environments, 2);
        assert_eq!(stats.secrets, 1);
        assert_eq!(stats.skipped, 0);

        let envs = store.environments().await;
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].namespace, "alpha-aaaa1111");
        assert_eq!(envs[0].status, EnvironmentStatus::Active);

        let secret = store.secret("env-aaaa1111-api").await.unwrap().unwrap();
        assert_eq!(secret.keys, vec!["api_key"]);
    }

    #[tokio::test]
    async fn unmanaged_objects_are_invisible() {
        let fake = FakeCluster::default();
        fake.apply(ClusterObject::new(
            ObjectMeta::named("kube-system"),
            ObjectPayload::Namespace,
        ))
        .await
        .unwrap();

        let store = seeded_store(&fake).await;
        let stats = store.refresh().await.unwrap();
        assert_eq!(stats.environments, 0);
        assert!(store.environments().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_managed_namespace_is_skipped_not_fatal() {
        let fake = FakeCluster::default();
        let mut broken = managed_namespace("env-cccc3333", "gamma-cccc3333");
        broken.meta.labels.remove(label::ENVIRONMENT_ID);
        fake.apply(broken).await.unwrap();
        fake.apply(managed_namespace("env-dddd4444", "delta-dddd4444"))
            .await
            .unwrap();

        let store = seeded_store(&fake).await;
        let stats = store.refresh().await.unwrap();
        assert_eq!(stats.environments, 1);
        assert_eq!(stats.skipped, 1);
        assert!(store.environment("env-dddd4444").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_service_id_refuses_to_guess() {
        let fake = FakeCluster::default();
        fake.apply(managed_namespace("env-eeee5555", "one-eeee5555"))
            .await
            .unwrap();
        fake.apply(managed_namespace("env-ffff6666", "two-ffff6666"))
            .await
            .unwrap();
        fake.apply(managed_secret("env-shared-api", "one-eeee5555"))
            .await
            .unwrap();
        fake.apply(managed_secret("env-shared-api", "two-ffff6666"))
            .await
            .unwrap();

        let store = seeded_store(&fake).await;
        store.refresh().await.unwrap();
        let err = store.secret("env-shared-api").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AmbiguousServiceId { count: 2, .. }
        ));
    }

    #[tokio::test]
    async fn refresh_replaces_stale_entries() {
        let fake = FakeCluster::default();
        let ns = managed_namespace("env-gggg7777", "stale-gggg7777");
        fake.apply(ns.clone()).await.unwrap();

        let store = seeded_store(&fake).await;
        store.refresh().await.unwrap();
        assert!(store.environment("env-gggg7777").await.is_some());

        fake.delete(&ns.object_ref()).await.unwrap();
        store.refresh().await.unwrap();
        assert!(store.environment("env-gggg7777").await.is_none());
    }
}
