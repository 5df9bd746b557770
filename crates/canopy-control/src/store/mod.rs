//! Storage backends for deployments, domains, and the top-up ledger.
//!
//! This module provides traits and implementations for persisting control
//! plane state. The primary implementation uses PostgreSQL, but an in-memory
//! implementation is provided for testing.
//!
//! Each entity gets its own trait so components can declare exactly the
//! storage they write: the orchestrator owns deployment status, the cycles
//! monitor owns balance fields and top-up rows, and the domain manager owns
//! registration fields. No two components write the same field.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CanopyResult;
use crate::types::{
    Cycles, DeploymentId, DeploymentRecord, DeploymentStatus, DomainRecord, NewDomain, NewTopUp,
    RegistrationStatus, TopUpRecord,
};

/// Backend for deployment records.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment record.
    ///
    /// Returns an error if a deployment with the same id already exists.
    async fn insert(&self, record: &DeploymentRecord) -> CanopyResult<()>;

    /// Get a deployment by id.
    async fn get(&self, id: DeploymentId) -> CanopyResult<Option<DeploymentRecord>>;

    /// Reset an existing deployment for a retry attempt.
    ///
    /// Updates the content path and puts the deployment back `InProgress`;
    /// the canister id and ledger block reference are left untouched.
    async fn restart(&self, id: DeploymentId, folder_path: &str) -> CanopyResult<()>;

    /// Update a deployment's status, optionally recording an error message.
    async fn update_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> CanopyResult<()>;

    /// Mark a deployment completed with its completion timestamp.
    async fn complete(&self, id: DeploymentId, deployed_at: DateTime<Utc>) -> CanopyResult<()>;

    /// Record the last observed cycles balance and check timestamp.
    async fn record_balance(
        &self,
        id: DeploymentId,
        cycles: Cycles,
        checked_at: DateTime<Utc>,
    ) -> CanopyResult<()>;

    /// List completed deployments whose balance was last checked at or
    /// before `older_than`.
    async fn list_due_for_check(
        &self,
        older_than: DateTime<Utc>,
    ) -> CanopyResult<Vec<DeploymentRecord>>;

    /// Whether a completed deployment with this id exists.
    async fn is_completed(&self, id: DeploymentId) -> CanopyResult<bool>;
}

/// Backend for custom domain records.
///
/// All read operations exclude soft-deleted rows.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Persist a new domain and return the stored record with its
    /// generated id.
    async fn insert(&self, domain: &NewDomain) -> CanopyResult<DomainRecord>;

    /// Get a domain by id.
    async fn get(&self, id: i64) -> CanopyResult<Option<DomainRecord>>;

    /// List a deployment's domains, newest first.
    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<DomainRecord>>;

    /// Whether a domain with this name already exists on the deployment.
    async fn exists(&self, deployment_id: DeploymentId, name: &str) -> CanopyResult<bool>;

    /// List all domains whose registration is not yet `Available`.
    async fn list_unresolved(&self) -> CanopyResult<Vec<DomainRecord>>;

    /// Update a domain's registration status and error message.
    async fn update_registration(
        &self,
        id: i64,
        status: RegistrationStatus,
        error: Option<&str>,
    ) -> CanopyResult<()>;

    /// Soft-delete a domain.
    async fn soft_delete(&self, id: i64) -> CanopyResult<()>;
}

/// Backend for the append-only top-up ledger.
#[async_trait]
pub trait TopUpStore: Send + Sync {
    /// Persist a new pending top-up attempt and return the stored record
    /// with its generated id.
    async fn insert(&self, top_up: &NewTopUp) -> CanopyResult<TopUpRecord>;

    /// Mark a top-up completed with the observed post-withdrawal balance.
    async fn complete(&self, id: i64, cycles_after: Cycles) -> CanopyResult<()>;

    /// Mark a top-up failed with the error that stopped it.
    async fn fail(&self, id: i64, error: &str) -> CanopyResult<()>;

    /// List a deployment's top-up attempts, newest first.
    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<TopUpRecord>>;
}
