//! Canopy Control Plane
//!
//! This crate runs the server side of canopy's static-site hosting on the
//! Internet Computer. It deploys content trees to asset canisters, keeps
//! those canisters funded with cycles, and manages custom domains through
//! the boundary-node registration API.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Deployment orchestration**: Creating asset canisters from the shared
//!   cycles pool, installing the frontend module, and uploading site content
//! - **Cycles monitoring**: Periodically checking hosted canisters' balances
//!   and topping up any that run low, with every attempt recorded in a
//!   ledger
//! - **Custom domains**: Publishing domain lists on the canisters,
//!   registering names with the boundary authority, and reconciling
//!   registration state until it resolves
//! - **API surface**: HTTP endpoints for deployments and domain management
//!
//! # Deployment lifecycle
//!
//! ```text
//! in_progress ──▶ completed
//!      │              ▲
//!      ▼              │ (resubmit, same canister)
//!    failed ──────────┘
//! ```
//!
//! Deployment ids are caller-assigned; resubmitting a failed id retries on
//! the canister provisioned by the first attempt instead of creating a new
//! one.

#![forbid(unsafe_code)]

pub mod alert;
pub mod api;
pub mod canister;
pub mod config;
pub mod deployment;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod registration;
pub mod service;
pub mod store;
pub mod sweep;
pub mod types;
pub mod util;

// Re-export commonly used types at the crate root
pub use canister::{CanisterClient, IcAgentClient, MockCanisterClient};
pub use config::CanopyConfig;
pub use deployment::{DeployRequest, DeploymentOrchestrator};
pub use domain::DomainManager;
pub use error::{CanopyError, CanopyResult};
pub use monitor::CyclesMonitor;
pub use registration::{HttpRegistrationClient, MockRegistrationClient, RegistrationClient};
pub use service::CanopyService;
pub use store::{DeploymentStore, DomainStore, MemoryStore, PostgresStore, TopUpStore};
pub use types::{
    CanisterId, Cycles, DeploymentId, DeploymentRecord, DeploymentStatus, DomainRecord,
    RegistrationStatus, TopUpRecord, TopUpStatus,
};
