//! REST API handlers.
//!
//! Reads refresh the snapshot first, so every response reflects the
//! cluster as of the request. Mutations go through the same code paths
//! the controllers use.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use gantry_cluster::{LabelSelector, ObjectKind, ObjectPayload, label};
use gantry_lifecycle::LifecycleError;
use gantry_rotation::{RotationError, RotationIntent};
use gantry_store::{DEFAULT_TTL_HOURS, EnvironmentSpec, EnvironmentStatus, ServiceSpec};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Environments ───────────────────────────────────────────────

/// Create request body.
#[derive(serde::Deserialize)]
pub struct CreateEnvironmentRequest {
    pub name: String,
    #[serde(default = "default_ttl")]
    pub ttl_hours: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL_HOURS
}

/// POST /api/v1/environments
pub async fn create_environment(
    State(state): State<ApiState>,
    Json(req): Json<CreateEnvironmentRequest>,
) -> impl IntoResponse {
    let spec = match EnvironmentSpec::create(
        &req.name,
        req.ttl_hours,
        req.labels,
        req.services,
        Utc::now(),
    ) {
        Ok(spec) => spec,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY)
                .into_response();
        }
    };
    if let Err(e) = state.provisioner.apply(&spec).await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    match state.store.environment(&spec.environment_id).await {
        Some(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        None => error_response(
            "environment provisioned but not yet listed",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .into_response(),
    }
}

/// List filters, both optional.
#[derive(serde::Deserialize, Default)]
pub struct EnvironmentFilter {
    pub namespace: Option<String>,
    pub status: Option<String>,
}

/// GET /api/v1/environments
pub async fn list_environments(
    State(state): State<ApiState>,
    Query(filter): Query<EnvironmentFilter>,
) -> impl IntoResponse {
    let status = match filter.status.as_deref() {
        None => None,
        Some(raw) => match EnvironmentStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return error_response(
                    &format!("unknown status filter {raw:?}"),
                    StatusCode::UNPROCESSABLE_ENTITY,
                )
                .into_response();
            }
        },
    };
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    let mut records = state.store.environments().await;
    records.retain(|r| {
        filter.namespace.as_deref().is_none_or(|ns| r.namespace == ns)
            && status.is_none_or(|s| r.status == s)
    });
    ApiResponse::ok(records).into_response()
}

/// GET /api/v1/environments/{id}
pub async fn get_environment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    match state.store.environment(&id).await {
        Some(record) => ApiResponse::ok(record).into_response(),
        None => error_response("environment not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// DELETE /api/v1/environments/{id}
pub async fn delete_environment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.delete_environment(&id, Utc::now()).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(LifecycleError::UnknownEnvironment(_)) => {
            error_response("environment not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Read-only rollout status for one deployment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeploymentStatus {
    pub name: String,
    pub image: String,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub pods: Vec<PodStatus>,
}

/// One pod behind a deployment, as the cluster reports it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PodStatus {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

/// GET /api/v1/environments/{id}/deployments
pub async fn environment_deployments(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    let Some(record) = state.store.environment(&id).await else {
        return error_response("environment not found", StatusCode::NOT_FOUND).into_response();
    };
    let selector = LabelSelector::managed();
    let deployments = match state
        .gateway
        .list(ObjectKind::Deployment, Some(&record.namespace), &selector)
        .await
    {
        Ok(objects) => objects,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    let pod_objects = match state
        .gateway
        .list(ObjectKind::Pod, Some(&record.namespace), &selector)
        .await
    {
        Ok(objects) => objects,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    // Pods carry the owning deployment's name in the app label.
    let statuses: Vec<DeploymentStatus> = deployments
        .iter()
        .filter_map(|obj| {
            let info = obj.as_deployment()?;
            let pods = pod_objects
                .iter()
                .filter(|pod| pod.meta.label(label::APP) == Some(obj.meta.name.as_str()))
                .filter_map(|pod| match &pod.payload {
                    ObjectPayload::Pod { phase, ready } => Some(PodStatus {
                        name: pod.meta.name.clone(),
                        phase: phase.clone(),
                        ready: *ready,
                    }),
                    _ => None,
                })
                .collect();
            Some(DeploymentStatus {
                name: obj.meta.name.clone(),
                image: info.image.clone(),
                replicas: info.replicas,
                ready_replicas: info.ready_replicas,
                available_replicas: info.available_replicas,
                pods,
            })
        })
        .collect();
    ApiResponse::ok(statuses).into_response()
}

// ── Secrets ────────────────────────────────────────────────────

/// GET /api/v1/secrets
pub async fn list_secrets(State(state): State<ApiState>) -> impl IntoResponse {
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    ApiResponse::ok(state.store.secrets().await).into_response()
}

/// GET /api/v1/secrets/{service_id}
pub async fn get_secret(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    match state.store.secret(&service_id).await {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("secret not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/secrets/{service_id}/rotate
pub async fn rotate_secret(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
    Json(intent): Json<RotationIntent>,
) -> impl IntoResponse {
    match state.rotator.rotate(&service_id, &intent, Utc::now()).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => {
            let status = rotation_status(&e);
            error_response(&e.to_string(), status).into_response()
        }
    }
}

fn rotation_status(err: &RotationError) -> StatusCode {
    match err {
        RotationError::NotFound(_) => StatusCode::NOT_FOUND,
        RotationError::UnknownKey { .. } | RotationError::InvalidRequest(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RotationError::RotationInProgress(_) | RotationError::ConflictRetry(_) => {
            StatusCode::CONFLICT
        }
        RotationError::Cluster(_) | RotationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /api/v1/secrets/{service_id}/history
pub async fn rotation_history(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.refresh().await {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }
    match state.store.secret(&service_id).await {
        Ok(Some(record)) => ApiResponse::ok(record.rotation_history).into_response(),
        Ok(None) => error_response("secret not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Probes ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

/// GET /readyz
pub async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    match state.gateway.ping().await {
        Ok(()) => ApiResponse::ok("ready").into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response(),
    }
}
