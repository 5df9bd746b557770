//! Custom domain endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{DeploymentId, DomainRecord};

use super::{error_reply, AppState, ErrorResponse};

/// Request to attach a custom domain.
#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    /// Domain name to attach.
    pub name: String,
}

/// Response for a custom domain.
#[derive(Debug, Serialize)]
pub struct DomainResponse {
    /// Domain id.
    pub id: i64,
    /// Owning deployment.
    pub deployment_id: i64,
    /// Domain name.
    pub name: String,
    /// Registration id at the authority.
    pub registration_id: String,
    /// Last known registration state.
    pub registration_status: String,
    /// Failure payload, present only for failed registrations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Attach a custom domain to a deployment.
pub async fn add_domain(
    State(state): State<AppState>,
    Path(deployment_id): Path<i64>,
    Json(request): Json<AddDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>), (StatusCode, Json<ErrorResponse>)> {
    info!(deployment_id, domain = %request.name, "adding domain via API");

    match state
        .domains
        .add_domain(DeploymentId::new(deployment_id), &request.name)
        .await
    {
        Ok(record) => Ok((StatusCode::CREATED, Json(record_to_response(record)))),
        Err(e) => Err(error_reply(&e)),
    }
}

/// List a deployment's domains.
pub async fn list_domains(
    State(state): State<AppState>,
    Path(deployment_id): Path<i64>,
) -> Result<Json<Vec<DomainResponse>>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .domains
        .get_domains(DeploymentId::new(deployment_id))
        .await
    {
        Ok(records) => Ok(Json(records.into_iter().map(record_to_response).collect())),
        Err(e) => Err(error_reply(&e)),
    }
}

/// Poll the registration authority and return the refreshed domain.
pub async fn domain_status(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
) -> Result<Json<DomainResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.domains.refresh(domain_id).await {
        Ok(record) => Ok(Json(record_to_response(record))),
        Err(e) => Err(error_reply(&e)),
    }
}

/// Detach a custom domain.
pub async fn remove_domain(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    info!(domain_id, "removing domain via API");

    match state.domains.remove_domain(domain_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(error_reply(&e)),
    }
}

fn record_to_response(record: DomainRecord) -> DomainResponse {
    DomainResponse {
        id: record.id,
        deployment_id: record.deployment_id.get(),
        name: record.name,
        registration_id: record.registration_id,
        registration_status: record.registration_status.as_str().to_owned(),
        registration_error: record.registration_error,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}
