//! Terraform-backed provisioner.
//!
//! Each environment gets its own workspace directory under the
//! configured root. Apply copies the module files in, writes the
//! variables file, then runs `init` and `apply`; destroy runs
//! `terraform destroy` and removes the workspace. A missing workspace
//! destroys cleanly, matching the absent-is-success contract.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gantry_store::{EnvironmentRecord, EnvironmentSpec};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::{Provisioned, Provisioner};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const VARS_FILE: &str = "terraform.tfvars.json";

/// Provisions environments by driving the terraform CLI.
pub struct TerraformProvisioner {
    binary: PathBuf,
    root: PathBuf,
    module_dir: Option<PathBuf>,
    timeout: Duration,
}

impl TerraformProvisioner {
    /// Workspaces are created under `root`, one per environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("terraform"),
            root: root.into(),
            module_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Module files (`*.tf`, `*.tf.json`) copied into each workspace.
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn workspace(&self, environment_id: &str) -> PathBuf {
        self.root.join(environment_id)
    }

    async fn prepare_workspace(&self, spec: &EnvironmentSpec) -> ProvisionResult<PathBuf> {
        let dir = self.workspace(&spec.environment_id);
        tokio::fs::create_dir_all(&dir).await?;

        if let Some(module) = &self.module_dir {
            let mut entries = tokio::fs::read_dir(module).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let text = name.to_string_lossy();
                if entry.file_type().await?.is_file()
                    && (text.ends_with(".tf") || text.ends_with(".tf.json"))
                {
                    tokio::fs::copy(entry.path(), dir.join(&name)).await?;
                }
            }
        }

        let services: Vec<_> = spec
            .services
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "image": s.image,
                    "replicas": s.replicas,
                    "cpu": s.cpu,
                    "memory": s.memory,
                    "env": s.env,
                    "ports": s.ports,
                })
            })
            .collect();
        let vars = serde_json::json!({
            "environment_id": spec.environment_id,
            "environment_name": spec.name,
            "namespace": spec.namespace,
            "ttl_hours": spec.ttl_hours,
            "created_at": spec.created_at.to_rfc3339(),
            "expires_at": spec.expires_at.to_rfc3339(),
            "labels": spec.labels,
            "services": services,
        });
        tokio::fs::write(dir.join(VARS_FILE), format!("{vars:#}")).await?;
        Ok(dir)
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> ProvisionResult<String> {
        debug!(?args, workspace = %dir.display(), "running terraform");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                ProvisionError::Timeout(format!(
                    "terraform {} after {:?}",
                    args.join(" "),
                    self.timeout
                ))
            })?
            .map_err(|e| {
                ProvisionError::Terraform(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Terraform(format!(
                "terraform {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn apply(&self, spec: &EnvironmentSpec) -> ProvisionResult<Provisioned> {
        let dir = self.prepare_workspace(spec).await?;
        self.run(&dir, &["init", "-input=false", "-no-color"]).await?;
        self.run(&dir, &["apply", "-auto-approve", "-input=false", "-no-color"])
            .await?;
        info!(
            environment = %spec.environment_id,
            workspace = %dir.display(),
            "terraform apply complete"
        );
        // The module owns secret seeding; nothing to report per service.
        Ok(Provisioned {
            environment_id: spec.environment_id.clone(),
            namespace: spec.namespace.clone(),
            seeded_secrets: Vec::new(),
        })
    }

    async fn destroy(&self, record: &EnvironmentRecord) -> ProvisionResult<()> {
        let dir = self.workspace(&record.environment_id);
        if !tokio::fs::try_exists(&dir).await? {
            debug!(
                environment = %record.environment_id,
                "no terraform workspace, nothing to destroy"
            );
            return Ok(());
        }
        self.run(&dir, &["destroy", "-auto-approve", "-input=false", "-no-color"])
            .await?;
        tokio::fs::remove_dir_all(&dir).await?;
        info!(environment = %record.environment_id, "terraform destroy complete");
        Ok(())
    }
}
