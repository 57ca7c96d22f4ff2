//! In-memory gateway for tests and standalone runs.
//!
//! Keeps every object in a map keyed by reference, assigns monotonically
//! increasing resource versions, and rejects stale conflict-checked
//! writes the way the real API server does. Failures can be injected
//! per-operation to exercise retry paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ClusterError, ClusterResult};
use crate::gateway::{ClusterGateway, DeleteOutcome};
use crate::labels::{LabelSelector, annotation};
use crate::object::{ClusterObject, ObjectKind, ObjectPayload, ObjectRef};

/// Operation selector for injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    Get,
    Apply,
    Delete,
    List,
    Restart,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectRef, ClusterObject>,
    next_version: u64,
    failures: VecDeque<(FakeOp, ClusterError)>,
}

impl FakeState {
    fn take_failure(&mut self, op: FakeOp) -> Option<ClusterError> {
        if self.failures.front().is_some_and(|(o, _)| *o == op) {
            return self.failures.pop_front().map(|(_, e)| e);
        }
        None
    }
}

/// In-memory `ClusterGateway` implementation.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call of the given operation. Queued
    /// failures are consumed front-to-back, one per matching call.
    pub fn fail_next(&self, op: FakeOp, error: ClusterError) {
        self.lock().failures.push_back((op, error));
    }

    /// Overwrite an object's resource version, simulating an out-of-band
    /// write that a conflict-checked apply will then trip over.
    pub fn bump_version(&self, reference: &ObjectRef) {
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version.to_string();
        if let Some(obj) = state.objects.get_mut(reference) {
            obj.meta.resource_version = Some(version);
        }
    }

    /// Number of objects currently stored.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn get(&self, reference: &ObjectRef) -> ClusterResult<Option<ClusterObject>> {
        // A real API server always suspends the caller; keep that
        // scheduling point so concurrent callers interleave in tests.
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(FakeOp::Get) {
            return Err(err);
        }
        Ok(state.objects.get(reference).cloned())
    }

    async fn apply(&self, mut object: ClusterObject) -> ClusterResult<ClusterObject> {
        tokio::task::yield_now().await;
        let reference = object.object_ref();
        if reference.kind.is_namespaced() && reference.namespace.is_none() {
            return Err(ClusterError::InvalidRef(format!(
                "{} requires a namespace",
                reference.kind
            )));
        }
        let mut state = self.lock();
        if let Some(err) = state.take_failure(FakeOp::Apply) {
            return Err(err);
        }
        if let (Some(supplied), Some(current)) = (
            object.meta.resource_version.as_deref(),
            state
                .objects
                .get(&reference)
                .and_then(|o| o.meta.resource_version.as_deref()),
        ) && supplied != current
        {
            return Err(ClusterError::Conflict(reference.to_string()));
        }
        state.next_version += 1;
        object.meta.resource_version = Some(state.next_version.to_string());
        if object.meta.created_at.is_none() {
            object.meta.created_at = Some(Utc::now());
        }
        state.objects.insert(reference, object.clone());
        Ok(object)
    }

    async fn delete(&self, reference: &ObjectRef) -> ClusterResult<DeleteOutcome> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(FakeOp::Delete) {
            return Err(err);
        }
        if state.objects.remove(reference).is_none() {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        // Deleting a namespace takes everything inside it along.
        if reference.kind == ObjectKind::Namespace {
            state
                .objects
                .retain(|r, _| r.namespace.as_deref() != Some(reference.name.as_str()));
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(FakeOp::List) {
            return Err(err);
        }
        Ok(state
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .filter(|o| namespace.is_none_or(|ns| o.meta.namespace.as_deref() == Some(ns)))
            .filter(|o| selector.matches(&o.meta.labels))
            .cloned()
            .collect())
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        stamp: DateTime<Utc>,
    ) -> ClusterResult<()> {
        tokio::task::yield_now().await;
        let reference = ObjectRef::namespaced(ObjectKind::Deployment, namespace, name);
        let mut state = self.lock();
        if let Some(err) = state.take_failure(FakeOp::Restart) {
            return Err(err);
        }
        let next_version = state.next_version + 1;
        let Some(obj) = state.objects.get_mut(&reference) else {
            return Err(ClusterError::Api(format!("{reference} not found")));
        };
        if let ObjectPayload::Deployment(info) = &mut obj.payload {
            info.template_annotations
                .insert(annotation::RESTARTED_AT.to_string(), stamp.to_rfc3339());
        }
        obj.meta.resource_version = Some(next_version.to_string());
        state.next_version = next_version;
        Ok(())
    }

    async fn ping(&self) -> ClusterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;

    fn namespace_object(name: &str) -> ClusterObject {
        ClusterObject::new(ObjectMeta::named(name), ObjectPayload::Namespace)
    }

    #[tokio::test]
    async fn apply_then_get_roundtrips() {
        let cluster = FakeCluster::new();
        let stored = cluster.apply(namespace_object("dev")).await.unwrap();
        assert!(stored.meta.resource_version.is_some());

        let reference = ObjectRef::cluster(ObjectKind::Namespace, "dev");
        let fetched = cluster.get(&reference).await.unwrap().unwrap();
        assert_eq!(fetched.meta.name, "dev");
    }

    #[tokio::test]
    async fn stale_resource_version_is_rejected() {
        let cluster = FakeCluster::new();
        let stored = cluster.apply(namespace_object("dev")).await.unwrap();

        let reference = stored.object_ref();
        cluster.bump_version(&reference);

        let err = cluster.apply(stored).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));
    }

    #[tokio::test]
    async fn apply_without_version_upserts() {
        let cluster = FakeCluster::new();
        cluster.apply(namespace_object("dev")).await.unwrap();

        let mut update = namespace_object("dev");
        update
            .meta
            .labels
            .insert("team".to_string(), "core".to_string());
        let stored = cluster.apply(update).await.unwrap();
        assert_eq!(stored.meta.label("team"), Some("core"));
    }

    #[tokio::test]
    async fn delete_absent_reports_already_absent() {
        let cluster = FakeCluster::new();
        let reference = ObjectRef::cluster(ObjectKind::Namespace, "ghost");
        assert_eq!(
            cluster.delete(&reference).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn deleting_namespace_removes_contents() {
        let cluster = FakeCluster::new();
        cluster.apply(namespace_object("dev")).await.unwrap();
        cluster
            .apply(ClusterObject::new(
                ObjectMeta::namespaced("dev", "creds"),
                ObjectPayload::Secret {
                    data: BTreeMap::new(),
                },
            ))
            .await
            .unwrap();

        let reference = ObjectRef::cluster(ObjectKind::Namespace, "dev");
        assert_eq!(
            cluster.delete(&reference).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn list_filters_by_kind_namespace_and_selector() {
        let cluster = FakeCluster::new();
        let mut labelled = namespace_object("dev");
        labelled
            .meta
            .labels
            .insert("managed-by".to_string(), "gantry".to_string());
        cluster.apply(labelled).await.unwrap();
        cluster.apply(namespace_object("other")).await.unwrap();

        let managed = cluster
            .list(ObjectKind::Namespace, None, &LabelSelector::managed())
            .await
            .unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].meta.name, "dev");
    }

    #[tokio::test]
    async fn injected_failures_fire_once_in_order() {
        let cluster = FakeCluster::new();
        cluster.fail_next(FakeOp::Delete, ClusterError::Timeout("delete".to_string()));

        let reference = ObjectRef::cluster(ObjectKind::Namespace, "dev");
        assert!(cluster.delete(&reference).await.is_err());
        assert!(cluster.delete(&reference).await.is_ok());
    }
}
