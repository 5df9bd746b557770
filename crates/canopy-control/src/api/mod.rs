//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Deployments (create/retry, query)
//! - Custom domains (attach, list, status, detach)
//! - Health checks

mod deployments;
mod domains;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    routing::{delete, get, post},
    Json, Router,
};

use crate::deployment::DeploymentOrchestrator;
use crate::domain::DomainManager;
use crate::error::CanopyError;

pub use deployments::{CreateDeploymentRequest, CreateDeploymentResponse, DeploymentResponse};
pub use domains::{AddDomainRequest, DomainResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator for running deployments.
    pub orchestrator: Arc<DeploymentOrchestrator>,
    /// Manager for custom domains.
    pub domains: Arc<DomainManager>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Deployments
        .route("/deployments", post(deployments::create_deployment))
        .route("/deployments/{id}", get(deployments::get_deployment))
        // Domains
        .route("/deployments/{id}/domains", post(domains::add_domain))
        .route("/deployments/{id}/domains", get(domains::list_domains))
        .route("/domains/{id}/status", get(domains::domain_status))
        .route("/domains/{id}", delete(domains::remove_domain))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Error response.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

fn error_reply(error: &CanopyError) -> (StatusCode, Json<ErrorResponse>) {
    (
        error_to_status(error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

const fn error_to_status(error: &CanopyError) -> StatusCode {
    match error {
        CanopyError::Validation(_) => StatusCode::BAD_REQUEST,
        CanopyError::DeploymentNotFound(_) | CanopyError::DomainNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        CanopyError::InsufficientFunds { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alert::AlertNotifier;
    use crate::canister::MockCanisterClient;
    use crate::config::CanisterConfig;
    use crate::registration::MockRegistrationClient;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// App state over in-memory collaborators, plus the content and wasm
    /// trees backing it.
    pub(crate) struct TestApp {
        pub state: AppState,
        pub folder_path: String,
        _content: tempfile::TempDir,
        _wasm: tempfile::TempDir,
    }

    pub(crate) fn make_test_app() -> TestApp {
        let content = tempfile::tempdir().expect("tempdir failed");
        std::fs::write(content.path().join("index.html"), "<html></html>").expect("write failed");

        let wasm_dir = tempfile::tempdir().expect("tempdir failed");
        let wasm_path = wasm_dir.path().join("frontend.wasm");
        std::fs::write(&wasm_path, b"fake wasm module").expect("write failed");

        let store = Arc::new(MemoryStore::new());
        let canister = Arc::new(MockCanisterClient::new());
        let config = CanisterConfig {
            frontend_wasm_path: wasm_path,
            ..CanisterConfig::default()
        };

        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            store.clone(),
            canister.clone(),
            Arc::new(AlertNotifier::disabled()),
            config,
        ));
        let domains = Arc::new(DomainManager::new(
            store,
            orchestrator.clone(),
            canister,
            Arc::new(MockRegistrationClient::new()),
        ));

        let folder_path = content.path().to_string_lossy().into_owned();
        TestApp {
            state: AppState {
                orchestrator,
                domains,
            },
            folder_path,
            _content: content,
            _wasm: wasm_dir,
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = router(make_test_app().state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
