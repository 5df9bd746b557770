//! Deployment orchestration.

mod orchestrator;

pub use orchestrator::{DeployRequest, DeploymentOrchestrator};
