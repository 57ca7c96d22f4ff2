//! gantry-api: REST API for the Gantry control plane.
//!
//! Provides axum route handlers for environments and secrets, nested
//! under `/api/v1`. Every response uses the `{success, data, error}`
//! envelope; secret values never appear in any payload.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/environments` | Create an environment |
//! | GET | `/api/v1/environments` | List environments (`?namespace=&status=`) |
//! | GET | `/api/v1/environments/{id}` | Get one environment |
//! | DELETE | `/api/v1/environments/{id}` | Tear an environment down now |
//! | GET | `/api/v1/environments/{id}/deployments` | Rollout status for the environment |
//! | GET | `/api/v1/secrets` | List secret metadata |
//! | GET | `/api/v1/secrets/{service_id}` | Get one secret's metadata |
//! | POST | `/api/v1/secrets/{service_id}/rotate` | Rotate secret values |
//! | GET | `/api/v1/secrets/{service_id}/history` | Rotation history |
//! | GET | `/healthz` | Liveness |
//! | GET | `/readyz` | Readiness (cluster reachable) |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gantry_cluster::ClusterGateway;
use gantry_lifecycle::LifecycleController;
use gantry_provision::Provisioner;
use gantry_rotation::RotationCoordinator;
use gantry_store::ReconciliationStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<dyn ClusterGateway>,
    pub store: ReconciliationStore,
    pub lifecycle: Arc<LifecycleController>,
    pub rotator: RotationCoordinator,
    pub provisioner: Arc<dyn Provisioner>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/environments",
            get(handlers::list_environments).post(handlers::create_environment),
        )
        .route(
            "/environments/{id}",
            get(handlers::get_environment).delete(handlers::delete_environment),
        )
        .route(
            "/environments/{id}/deployments",
            get(handlers::environment_deployments),
        )
        .route("/secrets", get(handlers::list_secrets))
        .route("/secrets/{service_id}", get(handlers::get_secret))
        .route("/secrets/{service_id}/rotate", post(handlers::rotate_secret))
        .route(
            "/secrets/{service_id}/history",
            get(handlers::rotation_history),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz).with_state(state))
}
