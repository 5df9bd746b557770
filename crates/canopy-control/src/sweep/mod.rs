//! Background sweep scheduling.
//!
//! Two periodic loops keep the control plane converged: the cycles monitor
//! sweep and the domain registration reconciler. A failed tick backs off
//! on its own shorter interval instead of waiting out the full period, and
//! both loops stop promptly on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::domain::DomainManager;
use crate::error::CanopyResult;
use crate::monitor::CyclesMonitor;

/// Run `tick` forever on a fixed interval until cancelled.
///
/// The delay after each tick depends on its outcome: `interval` after
/// success, `error_backoff` after a failure.
pub async fn run_periodic<F, Fut>(
    name: &str,
    interval: Duration,
    error_backoff: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = CanopyResult<()>>,
{
    info!(sweep = name, interval_secs = interval.as_secs(), "sweep started");

    loop {
        let delay = match tick().await {
            Ok(()) => interval,
            Err(e) => {
                warn!(sweep = name, error = %e, "sweep tick failed");
                error_backoff
            }
        };

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(sweep = name, "sweep stopped");
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Spawn the cycles and domain sweeps.
pub fn spawn_sweeps(
    monitor: Arc<CyclesMonitor>,
    domains: Arc<DomainManager>,
    config: &SweepConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let cycles_cancel = cancel.clone();
    let cycles_interval = Duration::from_secs(config.cycles_interval_secs);
    let cycles_backoff = Duration::from_secs(config.cycles_error_backoff_secs);
    let cycles = tokio::spawn(async move {
        run_periodic(
            "cycles",
            cycles_interval,
            cycles_backoff,
            cycles_cancel,
            move || {
                let monitor = monitor.clone();
                async move { monitor.sweep().await }
            },
        )
        .await;
    });

    let domains_cancel = cancel.clone();
    let domain_interval = Duration::from_secs(config.domain_interval_secs);
    let domain_backoff = Duration::from_secs(config.domain_error_backoff_secs);
    let domain = tokio::spawn(async move {
        run_periodic(
            "domains",
            domain_interval,
            domain_backoff,
            domains_cancel,
            move || {
                let domains = domains.clone();
                async move { domains.reconcile().await }
            },
        )
        .await;
    });

    vec![cycles, domain]
}
