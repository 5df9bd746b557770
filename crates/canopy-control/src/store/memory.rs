//! In-memory store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CanopyError, CanopyResult};
use crate::types::{
    Cycles, DeploymentId, DeploymentRecord, DeploymentStatus, DomainRecord, NewDomain, NewTopUp,
    RegistrationStatus, TopUpRecord, TopUpStatus,
};

use super::{DeploymentStore, DomainStore, TopUpStore};

/// In-memory store for testing.
///
/// This implementation is not suitable for production use as data is lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<i64, DeploymentRecord>>,
    domains: RwLock<HashMap<i64, DomainRecord>>,
    top_ups: RwLock<HashMap<i64, TopUpRecord>>,
    next_domain_id: AtomicI64,
    next_top_up_id: AtomicI64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> CanopyResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let key = record.id.get();
        if deployments.contains_key(&key) {
            return Err(CanopyError::internal(format!(
                "deployment {key} already exists"
            )));
        }

        deployments.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: DeploymentId) -> CanopyResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        Ok(deployments.get(&id.get()).cloned())
    }

    async fn restart(&self, id: DeploymentId, folder_path: &str) -> CanopyResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(&id.get())
            .ok_or(CanopyError::DeploymentNotFound(id.get()))?;

        record.folder_path = folder_path.to_owned();
        record.status = DeploymentStatus::InProgress;
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn update_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> CanopyResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(&id.get())
            .ok_or(CanopyError::DeploymentNotFound(id.get()))?;

        record.status = status;
        record.error = error.map(ToOwned::to_owned);
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn complete(&self, id: DeploymentId, deployed_at: DateTime<Utc>) -> CanopyResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(&id.get())
            .ok_or(CanopyError::DeploymentNotFound(id.get()))?;

        record.status = DeploymentStatus::Completed;
        record.deployed_at = Some(deployed_at);
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn record_balance(
        &self,
        id: DeploymentId,
        cycles: Cycles,
        checked_at: DateTime<Utc>,
    ) -> CanopyResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(&id.get())
            .ok_or(CanopyError::DeploymentNotFound(id.get()))?;

        record.remaining_cycles = Some(cycles);
        record.last_status_check_at = checked_at;
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn list_due_for_check(
        &self,
        older_than: DateTime<Utc>,
    ) -> CanopyResult<Vec<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let mut due: Vec<_> = deployments
            .values()
            .filter(|d| {
                d.status == DeploymentStatus::Completed && d.last_status_check_at <= older_than
            })
            .cloned()
            .collect();

        due.sort_by_key(|d| d.id.get());
        Ok(due)
    }

    async fn is_completed(&self, id: DeploymentId) -> CanopyResult<bool> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        Ok(deployments
            .get(&id.get())
            .is_some_and(|d| d.status == DeploymentStatus::Completed))
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn insert(&self, domain: &NewDomain) -> CanopyResult<DomainRecord> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let id = self.next_domain_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = DomainRecord {
            id,
            deployment_id: domain.deployment_id,
            name: domain.name.clone(),
            registration_id: domain.registration_id.clone(),
            registration_status: domain.registration_status,
            registration_error: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        domains.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> CanopyResult<Option<DomainRecord>> {
        let domains = self
            .domains
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        Ok(domains
            .get(&id)
            .filter(|d| d.deleted_at.is_none())
            .cloned())
    }

    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<DomainRecord>> {
        let domains = self
            .domains
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let mut result: Vec<_> = domains
            .values()
            .filter(|d| d.deployment_id == deployment_id && d.deleted_at.is_none())
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn exists(&self, deployment_id: DeploymentId, name: &str) -> CanopyResult<bool> {
        let domains = self
            .domains
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        Ok(domains
            .values()
            .any(|d| d.deployment_id == deployment_id && d.name == name && d.deleted_at.is_none()))
    }

    async fn list_unresolved(&self) -> CanopyResult<Vec<DomainRecord>> {
        let domains = self
            .domains
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let mut result: Vec<_> = domains
            .values()
            .filter(|d| {
                d.registration_status != RegistrationStatus::Available && d.deleted_at.is_none()
            })
            .cloned()
            .collect();

        result.sort_by_key(|d| d.id);
        Ok(result)
    }

    async fn update_registration(
        &self,
        id: i64,
        status: RegistrationStatus,
        error: Option<&str>,
    ) -> CanopyResult<()> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = domains.get_mut(&id).ok_or(CanopyError::DomainNotFound(id))?;

        record.registration_status = status;
        record.registration_error = error.map(ToOwned::to_owned);
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn soft_delete(&self, id: i64) -> CanopyResult<()> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = domains.get_mut(&id).ok_or(CanopyError::DomainNotFound(id))?;

        record.deleted_at = Some(Utc::now());
        record.updated_at = Utc::now();

        Ok(())
    }
}

#[async_trait]
impl TopUpStore for MemoryStore {
    async fn insert(&self, top_up: &NewTopUp) -> CanopyResult<TopUpRecord> {
        let mut top_ups = self
            .top_ups
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let id = self.next_top_up_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = TopUpRecord {
            id,
            deployment_id: top_up.deployment_id,
            canister_id: top_up.canister_id.clone(),
            amount: top_up.amount,
            cycles_before: top_up.cycles_before,
            cycles_after: None,
            status: TopUpStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        };

        top_ups.insert(id, record.clone());
        Ok(record)
    }

    async fn complete(&self, id: i64, cycles_after: Cycles) -> CanopyResult<()> {
        let mut top_ups = self
            .top_ups
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = top_ups
            .get_mut(&id)
            .ok_or_else(|| CanopyError::internal(format!("top-up {id} not found")))?;

        record.status = TopUpStatus::Completed;
        record.cycles_after = Some(cycles_after);
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn fail(&self, id: i64, error: &str) -> CanopyResult<()> {
        let mut top_ups = self
            .top_ups
            .write()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let record = top_ups
            .get_mut(&id)
            .ok_or_else(|| CanopyError::internal(format!("top-up {id} not found")))?;

        record.status = TopUpStatus::Failed;
        record.error = Some(error.to_owned());
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<TopUpRecord>> {
        let top_ups = self
            .top_ups
            .read()
            .map_err(|_| CanopyError::internal("lock poisoned"))?;

        let mut result: Vec<_> = top_ups
            .values()
            .filter(|t| t.deployment_id == deployment_id)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanisterId;

    fn test_deployment(id: i64) -> DeploymentRecord {
        DeploymentRecord::new(
            DeploymentId::new(id),
            42,
            CanisterId::new(format!("canister-{id}")),
            "123".to_owned(),
            "/tmp/site".to_owned(),
        )
    }

    #[tokio::test]
    async fn insert_and_get_deployment() {
        let store = MemoryStore::new();
        let record = test_deployment(1);

        DeploymentStore::insert(&store, &record)
            .await
            .expect("insert failed");

        let retrieved = DeploymentStore::get(&store, DeploymentId::new(1))
            .await
            .expect("get failed")
            .expect("deployment not found");

        assert_eq!(retrieved.id, record.id);
        assert_eq!(retrieved.canister_id, record.canister_id);
        assert_eq!(retrieved.status, DeploymentStatus::InProgress);
    }

    #[tokio::test]
    async fn duplicate_deployment_insert_fails() {
        let store = MemoryStore::new();
        let record = test_deployment(1);

        DeploymentStore::insert(&store, &record)
            .await
            .expect("first insert failed");
        assert!(DeploymentStore::insert(&store, &record).await.is_err());
    }

    #[tokio::test]
    async fn restart_resets_status_and_path() {
        let store = MemoryStore::new();
        let mut record = test_deployment(1);
        record.status = DeploymentStatus::Failed;
        DeploymentStore::insert(&store, &record)
            .await
            .expect("insert failed");

        store
            .restart(DeploymentId::new(1), "/tmp/other")
            .await
            .expect("restart failed");

        let retrieved = DeploymentStore::get(&store, DeploymentId::new(1))
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(retrieved.status, DeploymentStatus::InProgress);
        assert_eq!(retrieved.folder_path, "/tmp/other");
        assert_eq!(retrieved.canister_id.as_str(), "canister-1");
    }

    #[tokio::test]
    async fn complete_sets_timestamp() {
        let store = MemoryStore::new();
        DeploymentStore::insert(&store, &test_deployment(1))
            .await
            .expect("insert failed");

        let now = Utc::now();
        DeploymentStore::complete(&store, DeploymentId::new(1), now)
            .await
            .expect("complete failed");

        let retrieved = DeploymentStore::get(&store, DeploymentId::new(1))
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(retrieved.status, DeploymentStatus::Completed);
        assert_eq!(retrieved.deployed_at, Some(now));
        assert!(store
            .is_completed(DeploymentId::new(1))
            .await
            .expect("is_completed failed"));
    }

    #[tokio::test]
    async fn list_due_for_check_filters_status_and_age() {
        let store = MemoryStore::new();

        let mut stale = test_deployment(1);
        stale.status = DeploymentStatus::Completed;
        stale.last_status_check_at = Utc::now() - chrono::Duration::days(7);
        DeploymentStore::insert(&store, &stale)
            .await
            .expect("insert failed");

        let mut fresh = test_deployment(2);
        fresh.status = DeploymentStatus::Completed;
        DeploymentStore::insert(&store, &fresh)
            .await
            .expect("insert failed");

        let mut failed = test_deployment(3);
        failed.status = DeploymentStatus::Failed;
        failed.last_status_check_at = Utc::now() - chrono::Duration::days(7);
        DeploymentStore::insert(&store, &failed)
            .await
            .expect("insert failed");

        let due = store
            .list_due_for_check(Utc::now() - chrono::Duration::days(3))
            .await
            .expect("list failed");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, DeploymentId::new(1));
    }

    #[tokio::test]
    async fn domain_lifecycle() {
        let store = MemoryStore::new();
        let deployment_id = DeploymentId::new(1);

        let domain = DomainStore::insert(
            &store,
            &NewDomain {
                deployment_id,
                name: "example.com".to_owned(),
                registration_id: "reg-1".to_owned(),
                registration_status: RegistrationStatus::PendingOrder,
            },
        )
        .await
        .expect("insert failed");

        assert!(store
            .exists(deployment_id, "example.com")
            .await
            .expect("exists failed"));
        assert!(!store
            .exists(deployment_id, "other.com")
            .await
            .expect("exists failed"));

        store
            .update_registration(domain.id, RegistrationStatus::Available, None)
            .await
            .expect("update failed");

        let unresolved = store.list_unresolved().await.expect("list failed");
        assert!(unresolved.is_empty());

        store.soft_delete(domain.id).await.expect("delete failed");

        assert!(DomainStore::get(&store, domain.id)
            .await
            .expect("get failed")
            .is_none());
        assert!(DomainStore::list_for_deployment(&store, deployment_id)
            .await
            .expect("list failed")
            .is_empty());
        assert!(!store
            .exists(deployment_id, "example.com")
            .await
            .expect("exists failed"));
    }

    #[tokio::test]
    async fn unresolved_excludes_available_and_deleted() {
        let store = MemoryStore::new();
        let deployment_id = DeploymentId::new(1);

        for (name, status) in [
            ("a.com", RegistrationStatus::PendingOrder),
            ("b.com", RegistrationStatus::Available),
            ("c.com", RegistrationStatus::Failed),
        ] {
            DomainStore::insert(
                &store,
                &NewDomain {
                    deployment_id,
                    name: name.to_owned(),
                    registration_id: format!("reg-{name}"),
                    registration_status: status,
                },
            )
            .await
            .expect("insert failed");
        }

        let unresolved = store.list_unresolved().await.expect("list failed");
        let names: Vec<_> = unresolved.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.com", "c.com"]);
    }

    #[tokio::test]
    async fn top_up_ledger() {
        let store = MemoryStore::new();
        let deployment_id = DeploymentId::new(1);

        let top_up = TopUpStore::insert(
            &store,
            &NewTopUp {
                deployment_id,
                canister_id: CanisterId::new("canister-1"),
                amount: 500,
                cycles_before: 100,
            },
        )
        .await
        .expect("insert failed");
        assert_eq!(top_up.status, TopUpStatus::Pending);
        assert!(top_up.cycles_after.is_none());

        TopUpStore::complete(&store, top_up.id, 600)
            .await
            .expect("complete failed");

        let ledger = TopUpStore::list_for_deployment(&store, deployment_id)
            .await
            .expect("list failed");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, TopUpStatus::Completed);
        assert_eq!(ledger[0].cycles_after, Some(600));

        let failed = TopUpStore::insert(
            &store,
            &NewTopUp {
                deployment_id,
                canister_id: CanisterId::new("canister-1"),
                amount: 500,
                cycles_before: 600,
            },
        )
        .await
        .expect("insert failed");
        TopUpStore::fail(&store, failed.id, "withdrawal rejected")
            .await
            .expect("fail failed");

        let ledger = TopUpStore::list_for_deployment(&store, deployment_id)
            .await
            .expect("list failed");
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].status, TopUpStatus::Failed);
        assert_eq!(ledger[0].error.as_deref(), Some("withdrawal rejected"));
    }
}
