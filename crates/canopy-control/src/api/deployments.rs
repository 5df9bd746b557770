//! Deployment endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deployment::DeployRequest;
use crate::types::{Cycles, DeploymentId, DeploymentRecord};

use super::{error_reply, AppState, ErrorResponse};

/// Request to create (or retry) a deployment.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Caller-assigned deployment id. Resubmitting an id retries that
    /// deployment on its existing canister.
    pub deployment_id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Local path of the content tree to upload.
    pub folder_path: String,
}

/// Response for creating a deployment.
#[derive(Debug, Serialize)]
pub struct CreateDeploymentResponse {
    /// Deployment id.
    pub deployment_id: i64,
    /// Canister now hosting the content.
    pub canister_id: String,
}

/// Response for a deployment.
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    /// Deployment id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Hosting canister.
    pub canister_id: String,
    /// Current status.
    pub status: String,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completion timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<String>,
    /// Last observed cycles balance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_cycles: Option<Cycles>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Run a deployment to completion.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<CreateDeploymentResponse>), (StatusCode, Json<ErrorResponse>)> {
    info!(
        deployment_id = request.deployment_id,
        user_id = request.user_id,
        "creating deployment via API"
    );

    let deploy_request = DeployRequest {
        deployment_id: DeploymentId::new(request.deployment_id),
        user_id: request.user_id,
        folder_path: request.folder_path,
    };

    match state.orchestrator.deploy(deploy_request).await {
        Ok(canister_id) => Ok((
            StatusCode::CREATED,
            Json(CreateDeploymentResponse {
                deployment_id: request.deployment_id,
                canister_id: canister_id.as_str().to_owned(),
            }),
        )),
        Err(e) => Err(error_reply(&e)),
    }
}

/// Get a deployment by id.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeploymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .orchestrator
        .get_deployment(DeploymentId::new(id), None)
        .await
    {
        Ok(record) => Ok(Json(record_to_response(record))),
        Err(e) => Err(error_reply(&e)),
    }
}

fn record_to_response(record: DeploymentRecord) -> DeploymentResponse {
    DeploymentResponse {
        id: record.id.get(),
        user_id: record.user_id,
        canister_id: record.canister_id.as_str().to_owned(),
        status: record.status.as_str().to_owned(),
        error: record.error,
        deployed_at: record.deployed_at.map(|t| t.to_rfc3339()),
        remaining_cycles: record.remaining_cycles,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}
