//! LifecycleController: the periodic scan that advances environments.
//!
//! Status is a pure function of the recorded expiry and the injected
//! clock; the scan's only job is to make the cluster agree with it.
//! One scan runs at a time: a tick that lands while a scan is still in
//! flight skips instead of overlapping. Each environment is advanced
//! independently, so one failure never blocks the rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gantry_cluster::{ClusterGateway, ObjectKind, ObjectRef, annotation, label};
use gantry_provision::{Provisioner, manifest};
use gantry_store::{EnvironmentRecord, EnvironmentStatus, ReconciliationStore};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};

/// Tuning for the scan loop.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time between scans.
    pub scan_interval: Duration,
    /// How long before expiry an environment surfaces as Expiring.
    /// Purely informational; cleanup still waits for the expiry instant.
    pub warning_window: chrono::Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            warning_window: chrono::Duration::hours(1),
        }
    }
}

/// Counts from one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub transitions: usize,
    pub cleanups: usize,
    pub failures: usize,
    /// True when another scan held the lock and this one did nothing.
    pub skipped: bool,
}

enum Advance {
    None,
    Transitioned,
    Cleaned { transitioned: bool },
}

/// Compute the status an environment should be in right now.
///
/// Time rules win once the environment is past Creating; a Creating
/// environment holds until its scaffold is confirmed, except that an
/// expired one is reclaimed no matter how far provisioning got.
pub fn planned_status(
    record: &EnvironmentRecord,
    scaffold_ready: bool,
    now: DateTime<Utc>,
    warning_window: chrono::Duration,
) -> EnvironmentStatus {
    let implied = if now >= record.expires_at {
        EnvironmentStatus::Expired
    } else if now >= record.expires_at - warning_window {
        EnvironmentStatus::Expiring
    } else {
        EnvironmentStatus::Active
    };
    match record.status {
        EnvironmentStatus::Deleted => EnvironmentStatus::Deleted,
        EnvironmentStatus::Creating
            if implied != EnvironmentStatus::Expired && !scaffold_ready =>
        {
            EnvironmentStatus::Creating
        }
        _ => implied,
    }
}

/// Drives every environment through its state machine on a fixed tick.
pub struct LifecycleController {
    gateway: Arc<dyn ClusterGateway>,
    store: ReconciliationStore,
    provisioner: Arc<dyn Provisioner>,
    config: LifecycleConfig,
    scan_lock: Mutex<()>,
}

impl LifecycleController {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        store: ReconciliationStore,
        provisioner: Arc<dyn Provisioner>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            provisioner,
            config,
            scan_lock: Mutex::new(()),
        }
    }

    /// One full pass over every known environment at the given instant.
    pub async fn scan(&self, now: DateTime<Utc>) -> ScanSummary {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            debug!("scan already in flight, skipping");
            return ScanSummary {
                skipped: true,
                ..ScanSummary::default()
            };
        };

        let mut summary = ScanSummary::default();
        if let Err(err) = self.store.refresh().await {
            warn!(%err, "environment listing failed, scan aborted");
            summary.failures += 1;
            return summary;
        }

        for record in self.store.environments().await {
            summary.scanned += 1;
            match self.advance(&record, now).await {
                Ok(Advance::None) => {}
                Ok(Advance::Transitioned) => summary.transitions += 1,
                Ok(Advance::Cleaned { transitioned }) => {
                    if transitioned {
                        summary.transitions += 1;
                    }
                    summary.cleanups += 1;
                }
                Err(err) => {
                    warn!(
                        environment = %record.environment_id,
                        %err,
                        "advance failed, retrying on next scan"
                    );
                    summary.failures += 1;
                }
            }
        }
        debug!(
            scanned = summary.scanned,
            transitions = summary.transitions,
            cleanups = summary.cleanups,
            failures = summary.failures,
            "scan complete"
        );
        summary
    }

    /// User-initiated deletion. Shares the expiry cleanup routine, so
    /// racing a concurrent scan just means one of the two finds the
    /// namespace already gone.
    pub async fn delete_environment(
        &self,
        environment_id: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        let Some(record) = self.store.environment(environment_id).await else {
            return Err(LifecycleError::UnknownEnvironment(
                environment_id.to_string(),
            ));
        };
        info!(environment = %environment_id, "manual delete requested");
        self.cleanup(&record, now).await?;
        self.store.refresh().await?;
        Ok(())
    }

    /// Scan forever until shutdown flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.scan_interval.as_secs(),
            "lifecycle controller started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {
                    let summary = self.scan(Utc::now()).await;
                    if summary.failures > 0 {
                        warn!(failures = summary.failures, "scan finished with failures");
                    }
                }
                _ = shutdown.changed() => {
                    info!("lifecycle controller shutting down");
                    break;
                }
            }
        }
    }

    async fn advance(
        &self,
        record: &EnvironmentRecord,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Advance> {
        let scaffold_ready = if record.status == EnvironmentStatus::Creating {
            self.scaffold_ready(record).await?
        } else {
            true
        };
        let target = planned_status(record, scaffold_ready, now, self.config.warning_window);

        if target == EnvironmentStatus::Expired {
            let transitioned = record.status != EnvironmentStatus::Expired;
            if transitioned {
                info!(
                    environment = %record.environment_id,
                    from = %record.status,
                    "environment expired"
                );
                self.patch_status(record, EnvironmentStatus::Expired).await?;
            }
            self.cleanup(record, now).await?;
            return Ok(Advance::Cleaned { transitioned });
        }
        if target != record.status {
            info!(
                environment = %record.environment_id,
                from = %record.status,
                to = %target,
                "state transition"
            );
            self.patch_status(record, target).await?;
            return Ok(Advance::Transitioned);
        }
        Ok(Advance::None)
    }

    /// Whether the namespace scaffold finished provisioning.
    async fn scaffold_ready(&self, record: &EnvironmentRecord) -> LifecycleResult<bool> {
        for (kind, name) in [
            (ObjectKind::ResourceQuota, manifest::QUOTA_NAME),
            (ObjectKind::LimitRange, manifest::LIMITS_NAME),
        ] {
            let reference = ObjectRef::namespaced(kind, &record.namespace, name);
            if self.gateway.get(&reference).await?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Record a status transition on the namespace itself. The read
    /// carries the version token, so a concurrent writer surfaces as a
    /// conflict and the next scan retries.
    async fn patch_status(
        &self,
        record: &EnvironmentRecord,
        status: EnvironmentStatus,
    ) -> LifecycleResult<()> {
        let reference = ObjectRef::cluster(ObjectKind::Namespace, &record.namespace);
        let Some(mut object) = self.gateway.get(&reference).await? else {
            // Vanished between listing and patch; nothing left to update.
            return Ok(());
        };
        object
            .meta
            .labels
            .insert(label::ENVIRONMENT_STATUS.into(), status.as_str().into());
        self.gateway.apply(object).await?;
        Ok(())
    }

    /// Tear the environment down. At-least-once: called again after a
    /// failure it finds whatever is left and keeps going, and resources
    /// that are already gone count as success.
    async fn cleanup(
        &self,
        record: &EnvironmentRecord,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        if let Err(err) = self.provisioner.destroy(record).await {
            self.mark_cleanup_pending(record, now).await;
            return Err(err.into());
        }
        info!(
            environment = %record.environment_id,
            namespace = %record.namespace,
            "cleanup complete"
        );
        Ok(())
    }

    /// Best-effort marker so a repeatedly failing cleanup shows up as
    /// "expired, cleanup pending" instead of looking stuck.
    async fn mark_cleanup_pending(&self, record: &EnvironmentRecord, now: DateTime<Utc>) {
        let reference = ObjectRef::cluster(ObjectKind::Namespace, &record.namespace);
        let attempt = async {
            let Some(mut object) = self.gateway.get(&reference).await? else {
                return Ok(());
            };
            if object.meta.annotation(annotation::CLEANUP_PENDING).is_none() {
                object
                    .meta
                    .annotations
                    .insert(annotation::CLEANUP_PENDING.into(), now.to_rfc3339());
                self.gateway.apply(object).await?;
            }
            Ok::<(), gantry_cluster::ClusterError>(())
        };
        if let Err(err) = attempt.await {
            warn!(
                environment = %record.environment_id,
                %err,
                "failed to mark cleanup pending"
            );
        }
    }
}
