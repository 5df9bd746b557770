//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{CanopyError, CanopyResult};
use crate::types::{
    CanisterId, Cycles, DeploymentId, DeploymentRecord, DeploymentStatus, DomainRecord, NewDomain,
    NewTopUp, RegistrationStatus, TopUpRecord, TopUpStatus,
};

use super::{DeploymentStore, DomainStore, TopUpStore};

/// PostgreSQL-backed store.
///
/// Cycles amounts are persisted as text: they are opaque to SQL and can
/// exceed the range of `BIGINT`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(config: &DatabaseConfig) -> CanopyResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> CanopyResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> CanopyResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id BIGINT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                canister_id TEXT NOT NULL,
                block_id TEXT NOT NULL,
                folder_path TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                deployed_at TIMESTAMPTZ,
                remaining_cycles TEXT,
                last_status_check_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id BIGSERIAL PRIMARY KEY,
                deployment_id BIGINT NOT NULL REFERENCES deployments(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                registration_id TEXT NOT NULL,
                registration_status TEXT NOT NULL,
                registration_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS top_ups (
                id BIGSERIAL PRIMARY KEY,
                deployment_id BIGINT NOT NULL,
                canister_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                cycles_before TEXT NOT NULL,
                cycles_after TEXT,
                status TEXT NOT NULL,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_status_checked
            ON deployments (status, last_status_check_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_domains_deployment
            ON domains (deployment_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_domains_registration_status
            ON domains (registration_status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_top_ups_deployment
            ON top_ups (deployment_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn parse_cycles(raw: &str) -> CanopyResult<Cycles> {
        raw.parse()
            .map_err(|_| CanopyError::Serialisation(format!("invalid cycles value: {raw}")))
    }

    fn deployment_from_row(row: &PgRow) -> CanopyResult<DeploymentRecord> {
        let status_str: String = row.get("status");
        let status: DeploymentStatus = status_str.parse().map_err(|e| {
            CanopyError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;

        let remaining_cycles: Option<String> = row.get("remaining_cycles");
        let remaining_cycles = remaining_cycles
            .as_deref()
            .map(Self::parse_cycles)
            .transpose()?;

        Ok(DeploymentRecord {
            id: DeploymentId::new(row.get("id")),
            user_id: row.get("user_id"),
            canister_id: CanisterId::new(row.get::<String, _>("canister_id")),
            block_id: row.get("block_id"),
            folder_path: row.get("folder_path"),
            status,
            error: row.get("error"),
            deployed_at: row.get("deployed_at"),
            remaining_cycles,
            last_status_check_at: row.get("last_status_check_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn domain_from_row(row: &PgRow) -> CanopyResult<DomainRecord> {
        let status_str: String = row.get("registration_status");
        let registration_status: RegistrationStatus = status_str.parse().map_err(|e| {
            CanopyError::Serialisation(format!(
                "failed to parse registration status '{status_str}': {e}"
            ))
        })?;

        Ok(DomainRecord {
            id: row.get("id"),
            deployment_id: DeploymentId::new(row.get("deployment_id")),
            name: row.get("name"),
            registration_id: row.get("registration_id"),
            registration_status,
            registration_error: row.get("registration_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn top_up_from_row(row: &PgRow) -> CanopyResult<TopUpRecord> {
        let status_str: String = row.get("status");
        let status: TopUpStatus = status_str.parse().map_err(|e| {
            CanopyError::Serialisation(format!("failed to parse top-up status '{status_str}': {e}"))
        })?;

        let cycles_after: Option<String> = row.get("cycles_after");
        let cycles_after = cycles_after.as_deref().map(Self::parse_cycles).transpose()?;

        Ok(TopUpRecord {
            id: row.get("id"),
            deployment_id: DeploymentId::new(row.get("deployment_id")),
            canister_id: CanisterId::new(row.get::<String, _>("canister_id")),
            amount: Self::parse_cycles(&row.get::<String, _>("amount"))?,
            cycles_before: Self::parse_cycles(&row.get::<String, _>("cycles_before"))?,
            cycles_after,
            status,
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert(&self, record: &DeploymentRecord) -> CanopyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, user_id, canister_id, block_id, folder_path, status, error,
                deployed_at, remaining_cycles, last_status_check_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.get())
        .bind(record.user_id)
        .bind(record.canister_id.as_str())
        .bind(&record.block_id)
        .bind(&record.folder_path)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.deployed_at)
        .bind(record.remaining_cycles.map(|c| c.to_string()))
        .bind(record.last_status_check_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: DeploymentId) -> CanopyResult<Option<DeploymentRecord>> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(Self::deployment_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn restart(&self, id: DeploymentId, folder_path: &str) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET folder_path = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(folder_path)
        .bind(DeploymentStatus::InProgress.as_str())
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DeploymentNotFound(id.get()));
        }

        Ok(())
    }

    async fn update_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $1, error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DeploymentNotFound(id.get()));
        }

        Ok(())
    }

    async fn complete(&self, id: DeploymentId, deployed_at: DateTime<Utc>) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $1, deployed_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(DeploymentStatus::Completed.as_str())
        .bind(deployed_at)
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DeploymentNotFound(id.get()));
        }

        Ok(())
    }

    async fn record_balance(
        &self,
        id: DeploymentId,
        cycles: Cycles,
        checked_at: DateTime<Utc>,
    ) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET remaining_cycles = $1, last_status_check_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(cycles.to_string())
        .bind(checked_at)
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DeploymentNotFound(id.get()));
        }

        Ok(())
    }

    async fn list_due_for_check(
        &self,
        older_than: DateTime<Utc>,
    ) -> CanopyResult<Vec<DeploymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM deployments
            WHERE status = $1 AND last_status_check_at <= $2
            ORDER BY id
            "#,
        )
        .bind(DeploymentStatus::Completed.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::deployment_from_row).collect()
    }

    async fn is_completed(&self, id: DeploymentId) -> CanopyResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deployments WHERE id = $1 AND status = $2")
                .bind(id.get())
                .bind(DeploymentStatus::Completed.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }
}

#[async_trait]
impl DomainStore for PostgresStore {
    async fn insert(&self, domain: &NewDomain) -> CanopyResult<DomainRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO domains (deployment_id, name, registration_id, registration_status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(domain.deployment_id.get())
        .bind(&domain.name)
        .bind(&domain.registration_id)
        .bind(domain.registration_status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::domain_from_row(&row)
    }

    async fn get(&self, id: i64) -> CanopyResult<Option<DomainRecord>> {
        let row = sqlx::query("SELECT * FROM domains WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(Self::domain_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<DomainRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM domains
            WHERE deployment_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(deployment_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::domain_from_row).collect()
    }

    async fn exists(&self, deployment_id: DeploymentId, name: &str) -> CanopyResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM domains
            WHERE deployment_id = $1 AND name = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(deployment_id.get())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn list_unresolved(&self) -> CanopyResult<Vec<DomainRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM domains
            WHERE registration_status <> $1 AND deleted_at IS NULL
            ORDER BY id
            "#,
        )
        .bind(RegistrationStatus::Available.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::domain_from_row).collect()
    }

    async fn update_registration(
        &self,
        id: i64,
        status: RegistrationStatus,
        error: Option<&str>,
    ) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE domains
            SET registration_status = $1, registration_error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DomainNotFound(id));
        }

        Ok(())
    }

    async fn soft_delete(&self, id: i64) -> CanopyResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE domains
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CanopyError::DomainNotFound(id));
        }

        Ok(())
    }
}

#[async_trait]
impl TopUpStore for PostgresStore {
    async fn insert(&self, top_up: &NewTopUp) -> CanopyResult<TopUpRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO top_ups (deployment_id, canister_id, amount, cycles_before, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(top_up.deployment_id.get())
        .bind(top_up.canister_id.as_str())
        .bind(top_up.amount.to_string())
        .bind(top_up.cycles_before.to_string())
        .bind(TopUpStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::top_up_from_row(&row)
    }

    async fn complete(&self, id: i64, cycles_after: Cycles) -> CanopyResult<()> {
        sqlx::query(
            r#"
            UPDATE top_ups
            SET status = $1, cycles_after = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(TopUpStatus::Completed.as_str())
        .bind(cycles_after.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, id: i64, error: &str) -> CanopyResult<()> {
        sqlx::query(
            r#"
            UPDATE top_ups
            SET status = $1, error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(TopUpStatus::Failed.as_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> CanopyResult<Vec<TopUpRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM top_ups
            WHERE deployment_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(deployment_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::top_up_from_row).collect()
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn connect() -> PostgresStore {
        let url = get_database_url().expect("DATABASE_URL not set");
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        PostgresStore::new(&config).await.expect("failed to connect")
    }

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
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn deployment_round_trip() {
        let store = connect().await;
        let id = 910_001;

        DeploymentStore::insert(&store, &test_deployment(id))
            .await
            .expect("insert failed");

        let retrieved = DeploymentStore::get(&store, DeploymentId::new(id))
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(retrieved.status, DeploymentStatus::InProgress);
        assert_eq!(retrieved.canister_id.as_str(), format!("canister-{id}"));

        store
            .record_balance(DeploymentId::new(id), 123_456_789_012_345, Utc::now())
            .await
            .expect("record_balance failed");

        let retrieved = DeploymentStore::get(&store, DeploymentId::new(id))
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(retrieved.remaining_cycles, Some(123_456_789_012_345));

        sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(id)
            .execute(&store.pool)
            .await
            .expect("cleanup failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn domain_round_trip() {
        let store = connect().await;
        let deployment_id = 910_002;

        DeploymentStore::insert(&store, &test_deployment(deployment_id))
            .await
            .expect("insert failed");

        let domain = DomainStore::insert(
            &store,
            &NewDomain {
                deployment_id: DeploymentId::new(deployment_id),
                name: "example.com".to_owned(),
                registration_id: "reg-1".to_owned(),
                registration_status: RegistrationStatus::PendingOrder,
            },
        )
        .await
        .expect("insert failed");

        assert!(store
            .exists(DeploymentId::new(deployment_id), "example.com")
            .await
            .expect("exists failed"));

        store.soft_delete(domain.id).await.expect("delete failed");
        assert!(DomainStore::get(&store, domain.id)
            .await
            .expect("get failed")
            .is_none());

        sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(deployment_id)
            .execute(&store.pool)
            .await
            .expect("cleanup failed");
    }
}
