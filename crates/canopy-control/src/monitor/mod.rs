//! Cycles balance monitoring and automatic top-ups.
//!
//! Hosted canisters burn cycles continuously; if one runs dry its site goes
//! dark. The monitor sweeps completed deployments whose balance has not
//! been checked recently, records the observed balance, and tops up any
//! canister under the configured threshold from the shared pool.
//!
//! Every top-up attempt leaves a row in the ledger: `pending` while the
//! withdrawal settles, then `completed` with the post-withdrawal balance or
//! `failed` with the error. When the pool itself runs out of funds the
//! sweep stops immediately rather than burning through the remaining
//! deployments with doomed withdrawals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::alert::AlertNotifier;
use crate::canister::CanisterClient;
use crate::config::MonitorConfig;
use crate::error::{CanopyError, CanopyResult};
use crate::store::{DeploymentStore, TopUpStore};
use crate::types::{Cycles, DeploymentRecord, NewTopUp};
use crate::util::cycles_to_tc;

/// Interval between balance polls while a top-up settles.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sweeps deployments and tops up underfunded canisters.
pub struct CyclesMonitor {
    deployments: Arc<dyn DeploymentStore>,
    top_ups: Arc<dyn TopUpStore>,
    canister: Arc<dyn CanisterClient>,
    alerts: Arc<AlertNotifier>,
    config: MonitorConfig,
}

impl CyclesMonitor {
    /// Create a new monitor.
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        top_ups: Arc<dyn TopUpStore>,
        canister: Arc<dyn CanisterClient>,
        alerts: Arc<AlertNotifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            deployments,
            top_ups,
            canister,
            alerts,
            config,
        }
    }

    /// Run one sweep over every deployment due for a balance check.
    ///
    /// Individual check failures are logged and skipped; an exhausted
    /// cycles pool aborts the rest of the sweep, since every remaining
    /// withdrawal would fail the same way.
    pub async fn sweep(&self) -> CanopyResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.check_interval_days);
        let due = self.deployments.list_due_for_check(cutoff).await?;

        if due.is_empty() {
            debug!("no deployments due for a balance check");
            return Ok(());
        }

        info!(count = due.len(), "checking cycles balances");

        for record in due {
            match self.check_one(&record).await {
                Ok(()) => {}
                Err(CanopyError::InsufficientFunds { balance }) => {
                    error!(
                        deployment_id = %record.id,
                        balance,
                        "cycles pool exhausted, aborting sweep"
                    );
                    self.alerts
                        .notify(
                            "Top-ups halted: cycles pool exhausted",
                            &format!(
                                "Current balance: {} TC (trillion cycles)",
                                cycles_to_tc(balance)
                            ),
                            None,
                        )
                        .await;
                    break;
                }
                Err(e) => {
                    warn!(deployment_id = %record.id, error = %e, "balance check failed");
                }
            }
        }

        Ok(())
    }

    async fn check_one(&self, record: &DeploymentRecord) -> CanopyResult<()> {
        let status = self.canister.status(&record.canister_id).await?;

        let threshold = Cycles::from(self.config.min_cycles_threshold);
        if status.cycles >= threshold {
            debug!(
                deployment_id = %record.id,
                canister_id = %record.canister_id,
                cycles = status.cycles,
                "balance healthy"
            );
            self.deployments
                .record_balance(record.id, status.cycles, Utc::now())
                .await?;
            return Ok(());
        }

        info!(
            deployment_id = %record.id,
            canister_id = %record.canister_id,
            cycles = status.cycles,
            threshold,
            "balance below threshold, topping up"
        );

        // The check timestamp is only refreshed once the attempt resolves:
        // a failed top-up leaves the deployment due, so the next sweep
        // retries it instead of waiting out the full check interval.
        let after = self.top_up(record, status.cycles).await?;
        self.deployments
            .record_balance(record.id, after, Utc::now())
            .await?;

        Ok(())
    }

    /// Withdraw the configured amount into the canister and wait for the
    /// balance to move, recording the attempt in the ledger.
    async fn top_up(&self, record: &DeploymentRecord, before: Cycles) -> CanopyResult<Cycles> {
        let amount = Cycles::from(self.config.top_up_amount);
        let row = self
            .top_ups
            .insert(&NewTopUp {
                deployment_id: record.id,
                canister_id: record.canister_id.clone(),
                amount,
                cycles_before: before,
            })
            .await?;

        match self.withdraw_and_confirm(record, before, amount).await {
            Ok(after) => {
                self.top_ups.complete(row.id, after).await?;
                info!(
                    deployment_id = %record.id,
                    canister_id = %record.canister_id,
                    cycles_after = after,
                    "top-up completed"
                );
                Ok(after)
            }
            Err(e) => {
                if let Err(store_err) = self.top_ups.fail(row.id, &e.to_string()).await {
                    warn!(top_up_id = row.id, error = %store_err, "could not mark top-up failed");
                }
                Err(e)
            }
        }
    }

    async fn withdraw_and_confirm(
        &self,
        record: &DeploymentRecord,
        before: Cycles,
        amount: Cycles,
    ) -> CanopyResult<Cycles> {
        self.canister.withdraw(&record.canister_id, amount).await?;

        // The ledger confirms the withdrawal before the cycles land, so
        // poll until the canister reports a different balance. The poll is
        // bounded: a withdrawal that never lands marks the attempt failed
        // instead of wedging the sweep forever.
        for _ in 0..self.config.confirm_max_attempts {
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
            let status = self.canister.status(&record.canister_id).await?;
            if status.cycles != before {
                return Ok(status.cycles);
            }
        }

        Err(CanopyError::TopUpTimeout {
            canister_id: record.canister_id.as_str().to_owned(),
        })
    }
}

impl std::fmt::Debug for CyclesMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CyclesMonitor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canister::MockCanisterClient;
    use crate::store::MemoryStore;
    use crate::types::{CanisterId, DeploymentId, DeploymentStatus, TopUpStatus};

    const THRESHOLD: u64 = 300_000_000_000;
    const TOP_UP: u64 = 500_000_000_000;

    struct Harness {
        monitor: CyclesMonitor,
        store: Arc<MemoryStore>,
        canister: Arc<MockCanisterClient>,
    }

    fn make_harness(confirm_max_attempts: u32) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let canister = Arc::new(MockCanisterClient::new());
        let config = MonitorConfig {
            check_interval_days: 3,
            min_cycles_threshold: THRESHOLD,
            top_up_amount: TOP_UP,
            confirm_max_attempts,
        };
        let monitor = CyclesMonitor::new(
            store.clone(),
            store.clone(),
            canister.clone(),
            Arc::new(AlertNotifier::disabled()),
            config,
        );
        Harness {
            monitor,
            store,
            canister,
        }
    }

    /// Insert a completed deployment whose last check is a week old.
    async fn stale_deployment(h: &Harness, id: i64) -> DeploymentRecord {
        let mut record = DeploymentRecord::new(
            DeploymentId::new(id),
            42,
            CanisterId::new(format!("canister-{id}")),
            "123".to_owned(),
            "/tmp/site".to_owned(),
        );
        record.status = DeploymentStatus::Completed;
        record.last_status_check_at = Utc::now() - chrono::Duration::days(7);
        DeploymentStore::insert(h.store.as_ref(), &record)
            .await
            .expect("insert failed");
        record
    }

    #[tokio::test(start_paused = true)]
    async fn underfunded_canister_is_topped_up_once() {
        let h = make_harness(60);
        let record = stale_deployment(&h, 1).await;
        h.canister.set_cycles(&record.canister_id, 100);

        h.monitor.sweep().await.expect("sweep failed");

        let withdrawals = h.canister.withdrawals();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0].1, Cycles::from(TOP_UP));

        let rows = TopUpStore::list_for_deployment(h.store.as_ref(), record.id)
            .await
            .expect("list failed");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TopUpStatus::Completed);
        assert_eq!(rows[0].cycles_before, 100);
        assert_eq!(rows[0].cycles_after, Some(100 + Cycles::from(TOP_UP)));

        let updated = DeploymentStore::get(h.store.as_ref(), record.id)
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(updated.remaining_cycles, Some(100 + Cycles::from(TOP_UP)));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_balance_is_recorded_without_top_up() {
        let h = make_harness(60);
        let record = stale_deployment(&h, 1).await;
        h.canister
            .set_cycles(&record.canister_id, Cycles::from(THRESHOLD) * 2);

        h.monitor.sweep().await.expect("sweep failed");

        assert!(h.canister.withdrawals().is_empty());
        let updated = DeploymentStore::get(h.store.as_ref(), record.id)
            .await
            .expect("get failed")
            .expect("not found");
        assert_eq!(updated.remaining_cycles, Some(Cycles::from(THRESHOLD) * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_aborts_the_sweep() {
        let h = make_harness(60);
        let first = stale_deployment(&h, 1).await;
        let second = stale_deployment(&h, 2).await;
        h.canister.exhaust_pool(9);

        h.monitor.sweep().await.expect("sweep failed");

        // The first attempt is recorded as failed; the second deployment
        // is never attempted.
        let first_rows = TopUpStore::list_for_deployment(h.store.as_ref(), first.id)
            .await
            .expect("list failed");
        assert_eq!(first_rows.len(), 1);
        assert_eq!(first_rows[0].status, TopUpStatus::Failed);

        let second_rows = TopUpStore::list_for_deployment(h.store.as_ref(), second.id)
            .await
            .expect("list failed");
        assert!(second_rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_withdrawal_times_out() {
        let h = make_harness(3);
        let record = stale_deployment(&h, 1).await;
        h.canister.set_cycles(&record.canister_id, 100);
        h.canister.freeze_balance_on_withdraw();

        h.monitor.sweep().await.expect("sweep failed");

        let rows = TopUpStore::list_for_deployment(h.store.as_ref(), record.id)
            .await
            .expect("list failed");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TopUpStatus::Failed);
        assert!(rows[0]
            .error
            .as_deref()
            .expect("missing error")
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_top_up_leaves_deployment_due_for_retry() {
        let h = make_harness(60);
        let record = stale_deployment(&h, 1).await;
        h.canister.set_cycles(&record.canister_id, 100);
        h.canister.exhaust_pool(9);

        h.monitor.sweep().await.expect("sweep failed");
        assert!(h.canister.withdrawals().is_empty());

        // The canister was never funded, so the next sweep must pick the
        // deployment up again rather than wait out the check interval.
        let due = h
            .store
            .list_due_for_check(Utc::now() - chrono::Duration::days(3))
            .await
            .expect("list failed");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, record.id);
    }

    #[tokio::test(start_paused = true)]
    async fn recently_checked_deployments_are_skipped() {
        let h = make_harness(60);
        let mut record = DeploymentRecord::new(
            DeploymentId::new(1),
            42,
            CanisterId::new("canister-1"),
            "123".to_owned(),
            "/tmp/site".to_owned(),
        );
        record.status = DeploymentStatus::Completed;
        DeploymentStore::insert(h.store.as_ref(), &record)
            .await
            .expect("insert failed");
        h.canister.set_cycles(&record.canister_id, 100);

        h.monitor.sweep().await.expect("sweep failed");

        assert!(h.canister.withdrawals().is_empty());
    }
}
