//! Secret rotation coordinator.
//!
//! A rotation is one read-merge-write: read the live secret, mint new
//! material for the keys in scope, keep every other key's value, and
//! write the whole payload back with the version token from the read.
//! The history annotation rides along in the same write, so the swap
//! and its record land together or not at all. Restarting dependents
//! happens after the secret is already safe.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use gantry_cluster::{
    ClusterError, ClusterGateway, LabelSelector, ObjectKind, ObjectPayload, SECRET_VALUE_LENGTH,
    SecretValue, annotation, label,
};
use gantry_store::{HistoryEntry, SecretRecord, ServiceId, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RotationError;

/// Recorded as `rotated_by` on history entries this coordinator writes.
const ROTATED_BY: &str = "api";

/// What one rotation call should do. Lives only for the call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationIntent {
    /// Keys to rotate; empty means every key.
    pub keys: Vec<String>,
    pub generate_new: bool,
    pub update_deployments: bool,
}

impl Default for RotationIntent {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            generate_new: true,
            update_deployments: true,
        }
    }
}

/// Outcome of one restart trigger. A failure here never undoes the
/// rotation itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestartReport {
    pub deployment: String,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a successful rotation produced. Key names only, never values.
#[derive(Debug, Clone, Serialize)]
pub struct RotationResult {
    pub service_id: ServiceId,
    pub secret_name: String,
    pub namespace: String,
    /// Full key set after rotation; rotation never adds or drops keys.
    pub keys: Vec<String>,
    pub rotated_keys: Vec<String>,
    pub version: u64,
    pub rotated_at: DateTime<Utc>,
    pub restarts: Vec<RestartReport>,
}

/// Drives rotations, one at a time per service.
///
/// The in-flight set is the per-service token map: membership means a
/// rotation holds the token, and the entry vanishes with its guard.
/// Rotations for different services share nothing but the momentary
/// membership check.
#[derive(Clone)]
pub struct RotationCoordinator {
    gateway: Arc<dyn ClusterGateway>,
    in_flight: Arc<Mutex<HashSet<ServiceId>>>,
}

impl RotationCoordinator {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            gateway,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Rotate the keys in scope for the service's secret.
    ///
    /// Fails fast with `RotationInProgress` when another rotation for
    /// the same service holds the token. A write conflict retries the
    /// whole read-merge-write once before surfacing `ConflictRetry`.
    pub async fn rotate(
        &self,
        service_id: &str,
        intent: &RotationIntent,
        now: DateTime<Utc>,
    ) -> Result<RotationResult, RotationError> {
        if !intent.generate_new {
            return Err(RotationError::InvalidRequest(
                "generate_new must be true, rotation always mints new values".to_string(),
            ));
        }
        let _token = self.acquire(service_id)?;

        match self.rotate_once(service_id, intent, now).await {
            Err(RotationError::ConflictRetry(_)) => {
                debug!(service = service_id, "secret changed under us, retrying once");
                self.rotate_once(service_id, intent, now).await
            }
            outcome => outcome,
        }
    }

    /// Claim the service's rotation slot. Synchronous, so two callers
    /// racing the same service cannot interleave past this point.
    fn acquire(&self, service_id: &str) -> Result<InFlightToken, RotationError> {
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(service_id.to_string()) {
            return Err(RotationError::RotationInProgress(service_id.to_string()));
        }
        Ok(InFlightToken {
            in_flight: Arc::clone(&self.in_flight),
            service_id: service_id.to_string(),
        })
    }

    async fn rotate_once(
        &self,
        service_id: &str,
        intent: &RotationIntent,
        now: DateTime<Utc>,
    ) -> Result<RotationResult, RotationError> {
        // Resolve straight from the cluster, not the snapshot: the
        // write below needs the version token of the latest read.
        let selector = LabelSelector::managed().with(label::SERVICE_ID, service_id);
        let mut found = self
            .gateway
            .list(ObjectKind::Secret, None, &selector)
            .await?;
        if found.len() > 1 {
            return Err(RotationError::InvalidRequest(format!(
                "service {service_id} matches {} secrets, expected exactly one",
                found.len()
            )));
        }
        let Some(secret) = found.pop() else {
            return Err(RotationError::NotFound(service_id.to_string()));
        };
        let record = SecretRecord::from_object(&secret)?;

        let mut updated = secret;
        let ObjectPayload::Secret { data } = &mut updated.payload else {
            return Err(StoreError::Malformed(format!(
                "{} is not a secret",
                updated.meta.name
            ))
            .into());
        };

        let scope: Vec<String> = if intent.keys.is_empty() {
            record.keys.clone()
        } else {
            let unknown: Vec<String> = intent
                .keys
                .iter()
                .filter(|key| !data.contains_key(*key))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(RotationError::UnknownKey { keys: unknown });
            }
            let mut scope = intent.keys.clone();
            scope.sort_unstable();
            scope.dedup();
            scope
        };
        if scope.is_empty() {
            return Err(RotationError::InvalidRequest(format!(
                "secret {} has no keys to rotate",
                record.secret_name
            )));
        }

        for key in &scope {
            data.insert(key.clone(), SecretValue::generate(SECRET_VALUE_LENGTH));
        }

        let version = record.latest_version() + 1;
        let mut history = record.rotation_history.clone();
        history.push(HistoryEntry {
            version,
            rotated_at: now,
            rotated_by: ROTATED_BY.to_string(),
        });
        updated.meta.annotations.insert(
            annotation::ROTATION_HISTORY.to_string(),
            serde_json::json!(history).to_string(),
        );

        match self.gateway.apply(updated).await {
            Ok(_) => {}
            Err(ClusterError::Conflict(_)) => {
                return Err(RotationError::ConflictRetry(service_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        info!(
            service = service_id,
            secret = %record.secret_name,
            namespace = %record.namespace,
            version,
            rotated = scope.len(),
            "secret rotated"
        );

        let restarts = if intent.update_deployments {
            self.trigger_restarts(&record.namespace, &record.secret_name, now)
                .await
        } else {
            Vec::new()
        };

        Ok(RotationResult {
            service_id: service_id.to_string(),
            secret_name: record.secret_name,
            namespace: record.namespace,
            keys: record.keys,
            rotated_keys: scope,
            version,
            rotated_at: now,
            restarts,
        })
    }

    /// Nudge every deployment consuming the secret. Triggers only;
    /// rollout progress is observable separately and never awaited here.
    async fn trigger_restarts(
        &self,
        namespace: &str,
        secret_name: &str,
        stamp: DateTime<Utc>,
    ) -> Vec<RestartReport> {
        let deployments = match self
            .gateway
            .list(
                ObjectKind::Deployment,
                Some(namespace),
                &LabelSelector::managed(),
            )
            .await
        {
            Ok(deployments) => deployments,
            Err(err) => {
                warn!(%namespace, %err, "could not list deployments, restarts not triggered");
                return Vec::new();
            }
        };

        let mut reports = Vec::new();
        for deployment in deployments {
            let references = deployment
                .as_deployment()
                .is_some_and(|info| info.references_secret(secret_name));
            if !references {
                continue;
            }
            let name = deployment.meta.name.clone();
            let report = match self.gateway.restart_deployment(namespace, &name, stamp).await {
                Ok(()) => {
                    info!(%namespace, deployment = %name, "rolling restart triggered");
                    RestartReport {
                        deployment: name,
                        triggered: true,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(%namespace, deployment = %name, %err, "restart trigger failed");
                    RestartReport {
                        deployment: name,
                        triggered: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

/// Held for the duration of one rotation; dropping releases the
/// service's slot even when the rotation errors out.
struct InFlightToken {
    in_flight: Arc<Mutex<HashSet<ServiceId>>>,
    service_id: ServiceId,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.service_id);
    }
}

fn lock(set: &Mutex<HashSet<ServiceId>>) -> MutexGuard<'_, HashSet<ServiceId>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    use gantry_cluster::{
        ClusterObject, DeploymentInfo, FakeCluster, FakeOp, ObjectMeta, ObjectRef,
    };

    fn t0() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    fn coordinator(fake: &FakeCluster) -> RotationCoordinator {
        RotationCoordinator::new(Arc::new(fake.clone()))
    }

    fn no_restart() -> RotationIntent {
        RotationIntent {
            update_deployments: false,
            ..RotationIntent::default()
        }
    }

    async fn seed_secret(
        fake: &FakeCluster,
        namespace: &str,
        service_id: &str,
        values: &[(&str, &str)],
    ) {
        let mut meta = ObjectMeta::namespaced(namespace, &format!("{service_id}-secrets"));
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        meta.labels
            .insert(label::SERVICE_ID.into(), service_id.into());
        meta.annotations.insert(
            annotation::ROTATION_HISTORY.into(),
            serde_json::json!([HistoryEntry {
                version: 1,
                rotated_at: t0(),
                rotated_by: "provisioner".to_string(),
            }])
            .to_string(),
        );
        let data = values
            .iter()
            .map(|(k, v)| (k.to_string(), SecretValue::new(*v)))
            .collect();
        fake.apply(ClusterObject::new(meta, ObjectPayload::Secret { data }))
            .await
            .unwrap();
    }

    async fn stored_secret(
        fake: &FakeCluster,
        namespace: &str,
        service_id: &str,
    ) -> ClusterObject {
        let reference = ObjectRef::namespaced(
            ObjectKind::Secret,
            namespace,
            &format!("{service_id}-secrets"),
        );
        fake.get(&reference).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn rotating_one_key_leaves_the_rest_untouched() {
        let fake = FakeCluster::new();
        seed_secret(
            &fake,
            "dev",
            "env-1-api",
            &[("db_url", "old-db"), ("api_key", "old-api")],
        )
        .await;

        let intent = RotationIntent {
            keys: vec!["api_key".to_string()],
            ..no_restart()
        };
        let rotated_at = t0() + chrono::Duration::hours(1);
        let result = coordinator(&fake)
            .rotate("env-1-api", &intent, rotated_at)
            .await
            .unwrap();

        assert_eq!(result.rotated_keys, vec!["api_key"]);
        assert_eq!(result.version, 2);

        let stored = stored_secret(&fake, "dev", "env-1-api").await;
        let data = stored.as_secret_data().unwrap();
        assert_eq!(data["db_url"].reveal(), "old-db");
        assert_ne!(data["api_key"].reveal(), "old-api");
        assert_eq!(data["api_key"].len(), SECRET_VALUE_LENGTH);

        let record = SecretRecord::from_object(&stored).unwrap();
        assert_eq!(record.rotation_history.len(), 2);
        assert_eq!(record.latest_version(), 2);
        assert_eq!(record.last_rotated, Some(rotated_at));
    }

    #[tokio::test]
    async fn empty_key_scope_rotates_everything() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("db_url", "a"), ("api_key", "b")]).await;

        let result = coordinator(&fake)
            .rotate("env-1-api", &no_restart(), t0())
            .await
            .unwrap();
        assert_eq!(result.rotated_keys, vec!["api_key", "db_url"]);

        let stored = stored_secret(&fake, "dev", "env-1-api").await;
        let data = stored.as_secret_data().unwrap();
        assert_ne!(data["db_url"].reveal(), "a");
        assert_ne!(data["api_key"].reveal(), "b");
    }

    #[tokio::test]
    async fn successive_rotations_keep_versions_increasing() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("db_url", "a")]).await;

        let first = coordinator(&fake)
            .rotate("env-1-api", &no_restart(), t0() + chrono::Duration::hours(1))
            .await
            .unwrap();
        let second = coordinator(&fake)
            .rotate("env-1-api", &no_restart(), t0() + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(first.version, 2);
        assert_eq!(second.version, 3);

        // History stays in append order, oldest first.
        let record =
            SecretRecord::from_object(&stored_secret(&fake, "dev", "env-1-api").await).unwrap();
        let versions: Vec<u64> = record.rotation_history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_key_fails_without_touching_anything() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("db_url", "old-db")]).await;
        let before = stored_secret(&fake, "dev", "env-1-api").await;

        let intent = RotationIntent {
            keys: vec!["missing".to_string()],
            ..no_restart()
        };
        let err = coordinator(&fake)
            .rotate("env-1-api", &intent, t0())
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::UnknownKey { keys } if keys == ["missing"]));
        let after = stored_secret(&fake, "dev", "env-1-api").await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn concurrent_rotations_of_one_service_pick_one_winner() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("db_url", "a"), ("api_key", "b")]).await;
        let rotator = coordinator(&fake);

        let intent = no_restart();
        let (first, second) = tokio::join!(
            rotator.rotate("env-1-api", &intent, t0()),
            rotator.rotate("env-1-api", &intent, t0()),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(RotationError::RotationInProgress(_))))
        );

        // The slot is released, so a later rotation proceeds and the
        // version keeps climbing without duplicates.
        let third = rotator
            .rotate("env-1-api", &intent, t0() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(third.version, 3);
        let record =
            SecretRecord::from_object(&stored_secret(&fake, "dev", "env-1-api").await).unwrap();
        let versions: Vec<u64> = record.rotation_history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn different_services_rotate_in_parallel() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("api_key", "a")]).await;
        seed_secret(&fake, "dev", "env-1-worker", &[("api_key", "b")]).await;
        let rotator = coordinator(&fake);

        let intent = no_restart();
        let (a, b) = tokio::join!(
            rotator.rotate("env-1-api", &intent, t0()),
            rotator.rotate("env-1-worker", &intent, t0()),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn write_conflict_is_retried_once() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("api_key", "old")]).await;
        fake.fail_next(FakeOp::Apply, ClusterError::Conflict("secret".to_string()));

        let result = coordinator(&fake)
            .rotate("env-1-api", &no_restart(), t0())
            .await
            .unwrap();
        assert_eq!(result.version, 2);

        let record =
            SecretRecord::from_object(&stored_secret(&fake, "dev", "env-1-api").await).unwrap();
        assert_eq!(record.rotation_history.len(), 2);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_after_one_retry() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("api_key", "old")]).await;
        fake.fail_next(FakeOp::Apply, ClusterError::Conflict("secret".to_string()));
        fake.fail_next(FakeOp::Apply, ClusterError::Conflict("secret".to_string()));

        let err = coordinator(&fake)
            .rotate("env-1-api", &no_restart(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::ConflictRetry(_)));

        // Both writes were rejected, so nothing changed.
        let stored = stored_secret(&fake, "dev", "env-1-api").await;
        assert_eq!(stored.as_secret_data().unwrap()["api_key"].reveal(), "old");
        let record = SecretRecord::from_object(&stored).unwrap();
        assert_eq!(record.rotation_history.len(), 1);
    }

    fn deployment(namespace: &str, name: &str, secret_refs: &[&str]) -> ClusterObject {
        let mut meta = ObjectMeta::namespaced(namespace, name);
        meta.labels
            .insert(label::MANAGED_BY.into(), label::MANAGER.into());
        let info = DeploymentInfo {
            image: "registry.local/app:1".to_string(),
            replicas: 1,
            secret_refs: secret_refs.iter().map(|s| s.to_string()).collect(),
            ..DeploymentInfo::default()
        };
        ClusterObject::new(meta, ObjectPayload::Deployment(info))
    }

    #[tokio::test]
    async fn restarts_touch_only_dependents_and_report_failures() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("api_key", "old")]).await;
        fake.apply(deployment("dev", "api", &["env-1-api-secrets"]))
            .await
            .unwrap();
        fake.apply(deployment("dev", "unrelated", &["other-secrets"]))
            .await
            .unwrap();
        fake.apply(deployment("dev", "worker", &["env-1-api-secrets"]))
            .await
            .unwrap();
        fake.fail_next(
            FakeOp::Restart,
            ClusterError::Timeout("restart api".to_string()),
        );

        let stamp = t0() + chrono::Duration::hours(1);
        let result = coordinator(&fake)
            .rotate("env-1-api", &RotationIntent::default(), stamp)
            .await
            .unwrap();

        // The rotation stands even though one trigger failed.
        assert_eq!(result.version, 2);
        assert_eq!(result.restarts.len(), 2);
        let api = result
            .restarts
            .iter()
            .find(|r| r.deployment == "api")
            .unwrap();
        assert!(!api.triggered);
        assert!(api.error.is_some());
        let worker = result
            .restarts
            .iter()
            .find(|r| r.deployment == "worker")
            .unwrap();
        assert!(worker.triggered);
        assert!(worker.error.is_none());

        // Dependents got the restart stamp, the unrelated one did not.
        let restarted = fake
            .get(&ObjectRef::namespaced(ObjectKind::Deployment, "dev", "worker"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            restarted
                .as_deployment()
                .unwrap()
                .template_annotations
                .get(annotation::RESTARTED_AT),
            Some(&stamp.to_rfc3339())
        );
        let untouched = fake
            .get(&ObjectRef::namespaced(
                ObjectKind::Deployment,
                "dev",
                "unrelated",
            ))
            .await
            .unwrap()
            .unwrap();
        assert!(
            untouched
                .as_deployment()
                .unwrap()
                .template_annotations
                .is_empty()
        );
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let fake = FakeCluster::new();
        let err = coordinator(&fake)
            .rotate("env-ghost-api", &RotationIntent::default(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::NotFound(_)));
    }

    #[tokio::test]
    async fn declining_to_generate_is_invalid() {
        let fake = FakeCluster::new();
        seed_secret(&fake, "dev", "env-1-api", &[("api_key", "a")]).await;

        let intent = RotationIntent {
            generate_new: false,
            ..RotationIntent::default()
        };
        let err = coordinator(&fake)
            .rotate("env-1-api", &intent, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::InvalidRequest(_)));
    }

    #[test]
    fn intent_defaults_rotate_everything_and_restart() {
        let intent: RotationIntent = serde_json::from_str("{}").unwrap();
        assert!(intent.keys.is_empty());
        assert!(intent.generate_new);
        assert!(intent.update_deployments);
    }
}
