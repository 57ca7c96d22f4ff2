//! gantryd, the Gantry daemon.
//!
//! Single binary that assembles the portal control plane:
//! - Cluster gateway (kube or in-memory)
//! - Reconciliation store
//! - Provisioner (manifests or terraform)
//! - Lifecycle controller with its background scan loop
//! - Secret rotation coordinator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gantryd --listen 0.0.0.0:8443 --cluster kube --scan-interval 60
//! ```

mod config;

use std::sync::Arc;

use clap::Parser;
use gantry_api::{ApiState, build_router};
use gantry_cluster::{ClusterGateway, FakeCluster, KubeGateway};
use gantry_lifecycle::{LifecycleConfig, LifecycleController};
use gantry_provision::{ManifestProvisioner, Provisioner, TerraformProvisioner};
use gantry_rotation::RotationCoordinator;
use gantry_store::ReconciliationStore;
use tokio::sync::watch;
use tracing::info;

use crate::config::{Args, ClusterMode, FileConfig, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, &file);

    init_tracing(settings.log_json);
    run(settings).await
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gantryd=debug".parse().unwrap());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!("gantry daemon starting");

    // ── Cluster gateway ────────────────────────────────────────
    let gateway: Arc<dyn ClusterGateway> = match settings.cluster {
        ClusterMode::Kube => {
            let gateway = KubeGateway::connect(settings.cluster_timeout).await?;
            info!(
                timeout_secs = settings.cluster_timeout.as_secs(),
                "connected to the cluster"
            );
            Arc::new(gateway)
        }
        ClusterMode::InMemory => {
            info!("using the in-memory cluster");
            Arc::new(FakeCluster::default())
        }
    };

    // ── Store ──────────────────────────────────────────────────
    let store = ReconciliationStore::new(gateway.clone());
    let stats = store.refresh().await?;
    info!(
        environments = stats.environments,
        secrets = stats.secrets,
        "initial snapshot loaded"
    );

    // ── Provisioner ────────────────────────────────────────────
    let provisioner: Arc<dyn Provisioner> = match &settings.terraform {
        Some(tf) => {
            let mut terraform = TerraformProvisioner::new(&tf.root).with_binary(&tf.binary);
            if let Some(module) = &tf.module_dir {
                terraform = terraform.with_module_dir(module);
            }
            info!(root = %tf.root.display(), "terraform provisioner ready");
            Arc::new(terraform)
        }
        None => {
            info!("manifest provisioner ready");
            Arc::new(ManifestProvisioner::new(gateway.clone()))
        }
    };

    // ── Controllers ────────────────────────────────────────────
    let lifecycle = Arc::new(LifecycleController::new(
        gateway.clone(),
        store.clone(),
        provisioner.clone(),
        LifecycleConfig {
            scan_interval: settings.scan_interval,
            warning_window: settings.warning_window,
        },
    ));
    let rotator = RotationCoordinator::new(gateway.clone());

    // ── Background scan loop ───────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner = lifecycle.clone();
    let scan_handle = tokio::spawn(async move {
        scanner.run(shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────
    let router = build_router(ApiState {
        gateway,
        store,
        lifecycle,
        rotator,
        provisioner,
    });

    info!(addr = %settings.listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(settings.listen).await?;

    let server =
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown_tx));
    server.await?;

    let _ = scan_handle.await;
    info!("gantry daemon stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM, then flips the shutdown watch so the
/// scan loop stops alongside the server.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
