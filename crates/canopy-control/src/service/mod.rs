//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::AlertNotifier;
use crate::api;
use crate::canister::{CanisterClient, IcAgentClient};
use crate::config::CanopyConfig;
use crate::deployment::DeploymentOrchestrator;
use crate::domain::DomainManager;
use crate::error::{CanopyError, CanopyResult};
use crate::monitor::CyclesMonitor;
use crate::registration::HttpRegistrationClient;
use crate::store::{MemoryStore, PostgresStore};
use crate::sweep;

/// Storage handles for every entity, all backed by the same store.
struct Stores {
    deployments: Arc<dyn crate::store::DeploymentStore>,
    domains: Arc<dyn crate::store::DomainStore>,
    top_ups: Arc<dyn crate::store::TopUpStore>,
}

/// The canopy control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Database connections
/// - The canister and registration clients
/// - Background sweeps (cycles monitor, domain reconciler)
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct CanopyService {
    config: CanopyConfig,
    cancel: CancellationToken,
}

impl CanopyService {
    /// Create a new service with the given configuration.
    #[must_use]
    pub fn new(config: CanopyConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the service.
    ///
    /// This will:
    /// 1. Connect to the database (or use the in-memory store as fallback)
    /// 2. Connect the canister and registration clients
    /// 3. Create the orchestrator, monitor, and domain manager
    /// 4. Spawn the background sweeps
    /// 5. Start the HTTP API server and wait for shutdown
    pub async fn run(&self) -> CanopyResult<()> {
        let stores = self.create_stores().await;

        let canister: Arc<dyn CanisterClient> =
            Arc::new(IcAgentClient::connect(&self.config.canister).await?);
        info!(url = %self.config.canister.url, "canister client connected");

        let registration = Arc::new(HttpRegistrationClient::new(&self.config.registration)?);
        info!(url = %self.config.registration.base_url, "registration client configured");

        let alerts = Arc::new(AlertNotifier::new(&self.config.alert));

        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            Arc::clone(&stores.deployments),
            Arc::clone(&canister),
            Arc::clone(&alerts),
            self.config.canister.clone(),
        ));

        let monitor = Arc::new(CyclesMonitor::new(
            Arc::clone(&stores.deployments),
            Arc::clone(&stores.top_ups),
            Arc::clone(&canister),
            Arc::clone(&alerts),
            self.config.monitor.clone(),
        ));

        let domains = Arc::new(DomainManager::new(
            Arc::clone(&stores.domains),
            Arc::clone(&orchestrator),
            Arc::clone(&canister),
            registration,
        ));

        let sweep_handles = if self.config.sweep.enabled {
            sweep::spawn_sweeps(
                monitor,
                Arc::clone(&domains),
                &self.config.sweep,
                &self.cancel,
            )
        } else {
            warn!("background sweeps disabled");
            Vec::new()
        };

        let state = api::AppState {
            orchestrator,
            domains,
        };
        let app = api::router(state);

        info!(listen_addr = %self.config.server.listen_addr, "control service listening");

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| CanopyError::Config(format!("failed to bind TCP: {e}")))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| CanopyError::Config(format!("server error: {e}")))?;

        // The server is down; stop the sweeps too.
        self.cancel.cancel();
        for handle in sweep_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sweep task panicked");
            }
        }

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_stores(&self) -> Stores {
        match PostgresStore::new(&self.config.database).await {
            Ok(store) => {
                info!(url = %self.config.database.url, "connected to PostgreSQL");
                let store = Arc::new(store);
                Stores {
                    deployments: store.clone(),
                    domains: store.clone(),
                    top_ups: store,
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to connect to PostgreSQL, using in-memory store"
                );
                let store = Arc::new(MemoryStore::new());
                Stores {
                    deployments: store.clone(),
                    domains: store.clone(),
                    top_ups: store,
                }
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_creation() {
        let config = CanopyConfig::default();
        let service = CanopyService::new(config);
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let config = CanopyConfig::default();
        let service = CanopyService::new(config);
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }
}
