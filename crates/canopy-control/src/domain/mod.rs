//! Custom domain management and registration reconciliation.
//!
//! Attaching a domain to a deployment has two halves: the canister must
//! list the name in its `/.well-known/ic-domains` asset, and the boundary
//! registration authority must verify DNS and issue a certificate. This
//! module keeps both in step with the domain records in the store.
//!
//! Registration is asynchronous on the authority's side, so records start
//! in `PendingOrder` and the reconciler polls every unresolved registration
//! until it reaches `Available` or `Failed`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::canister::{AssetUpload, CanisterClient};
use crate::deployment::DeploymentOrchestrator;
use crate::error::{CanopyError, CanopyResult};
use crate::registration::RegistrationClient;
use crate::store::DomainStore;
use crate::types::{CanisterId, DeploymentId, DeploymentStatus, DomainRecord, NewDomain};

/// Asset listing the custom domains the boundary nodes may route to this
/// canister, one name per line.
const IC_DOMAINS_KEY: &str = "/.well-known/ic-domains";

/// Longest name the DNS allows.
const MAX_DOMAIN_LENGTH: usize = 253;

/// Manages custom domains for deployments.
pub struct DomainManager {
    domains: Arc<dyn DomainStore>,
    orchestrator: Arc<DeploymentOrchestrator>,
    canister: Arc<dyn CanisterClient>,
    registration: Arc<dyn RegistrationClient>,
}

impl DomainManager {
    /// Create a new domain manager.
    pub fn new(
        domains: Arc<dyn DomainStore>,
        orchestrator: Arc<DeploymentOrchestrator>,
        canister: Arc<dyn CanisterClient>,
        registration: Arc<dyn RegistrationClient>,
    ) -> Self {
        Self {
            domains,
            orchestrator,
            canister,
            registration,
        }
    }

    /// Attach a custom domain to a completed deployment.
    ///
    /// Publishes the name in the canister's domain list, submits the
    /// registration, and persists the record in `PendingOrder`; the
    /// reconciler takes it from there.
    pub async fn add_domain(
        &self,
        deployment_id: DeploymentId,
        name: &str,
    ) -> CanopyResult<DomainRecord> {
        let name = name.trim().to_lowercase();
        validate_domain_name(&name)?;

        let deployment = self
            .orchestrator
            .get_deployment(deployment_id, None)
            .await?;
        if deployment.status != DeploymentStatus::Completed {
            return Err(CanopyError::validation(format!(
                "deployment {deployment_id} is not completed"
            )));
        }

        if self.domains.exists(deployment_id, &name).await? {
            return Err(CanopyError::validation(format!(
                "domain {name} is already attached to deployment {deployment_id}"
            )));
        }

        self.add_to_domain_list(&deployment.canister_id, &name)
            .await?;

        let registration_id = self.registration.register(&name).await?;

        let record = self
            .domains
            .insert(&NewDomain {
                deployment_id,
                name: name.clone(),
                registration_id,
                registration_status: crate::types::RegistrationStatus::PendingOrder,
            })
            .await?;

        info!(
            deployment_id = %deployment_id,
            domain = %name,
            registration_id = %record.registration_id,
            "domain registration submitted"
        );

        Ok(record)
    }

    /// Detach a custom domain: unpublish it from the canister, soft-delete
    /// the record, and delete the upstream registration.
    pub async fn remove_domain(&self, domain_id: i64) -> CanopyResult<()> {
        let domain = self
            .domains
            .get(domain_id)
            .await?
            .ok_or(CanopyError::DomainNotFound(domain_id))?;
        let deployment = self
            .orchestrator
            .get_deployment(domain.deployment_id, None)
            .await?;

        self.remove_from_domain_list(&deployment.canister_id, &domain.name)
            .await?;
        self.domains.soft_delete(domain_id).await?;
        self.registration.delete(&domain.registration_id).await?;

        info!(
            deployment_id = %domain.deployment_id,
            domain = %domain.name,
            "domain removed"
        );

        Ok(())
    }

    /// List a deployment's domains.
    pub async fn get_domains(&self, deployment_id: DeploymentId) -> CanopyResult<Vec<DomainRecord>> {
        self.domains.list_for_deployment(deployment_id).await
    }

    /// Poll the authority for a single domain and return the refreshed
    /// record.
    pub async fn refresh(&self, domain_id: i64) -> CanopyResult<DomainRecord> {
        let domain = self
            .domains
            .get(domain_id)
            .await?
            .ok_or(CanopyError::DomainNotFound(domain_id))?;

        self.check_and_update(&domain).await?;

        self.domains
            .get(domain_id)
            .await?
            .ok_or(CanopyError::DomainNotFound(domain_id))
    }

    /// Poll the authority for every unresolved registration and mirror the
    /// reported state into the store.
    ///
    /// Per-domain failures are logged and skipped so one broken
    /// registration cannot stall the rest.
    pub async fn reconcile(&self) -> CanopyResult<()> {
        let unresolved = self.domains.list_unresolved().await?;
        if unresolved.is_empty() {
            return Ok(());
        }

        debug!(count = unresolved.len(), "reconciling domain registrations");

        for domain in unresolved {
            if let Err(e) = self.check_and_update(&domain).await {
                warn!(
                    domain_id = domain.id,
                    domain = %domain.name,
                    error = %e,
                    "registration check failed"
                );
            }
        }

        Ok(())
    }

    async fn check_and_update(&self, domain: &DomainRecord) -> CanopyResult<()> {
        let response = self.registration.status(&domain.registration_id).await?;

        // Only write when the authority reports something new.
        if response.status == domain.registration_status
            && response.error == domain.registration_error
        {
            return Ok(());
        }

        self.domains
            .update_registration(domain.id, response.status, response.error.as_deref())
            .await?;

        info!(
            domain_id = domain.id,
            domain = %domain.name,
            status = %response.status,
            "registration state changed"
        );

        Ok(())
    }

    async fn read_domain_list(&self, canister_id: &CanisterId) -> CanopyResult<Option<Vec<String>>> {
        let Some(content) = self.canister.read_asset(canister_id, IC_DOMAINS_KEY).await? else {
            return Ok(None);
        };

        let names = String::from_utf8_lossy(&content)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        Ok(Some(names))
    }

    async fn write_domain_list(
        &self,
        canister_id: &CanisterId,
        names: &[String],
    ) -> CanopyResult<()> {
        self.canister
            .store_asset(
                canister_id,
                &AssetUpload {
                    key: IC_DOMAINS_KEY.to_owned(),
                    content: names.join("\n").into_bytes(),
                    content_type: "text/plain".to_owned(),
                },
            )
            .await
    }

    async fn add_to_domain_list(&self, canister_id: &CanisterId, name: &str) -> CanopyResult<()> {
        let mut names = self.read_domain_list(canister_id).await?.unwrap_or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
        self.write_domain_list(canister_id, &names).await
    }

    async fn remove_from_domain_list(
        &self,
        canister_id: &CanisterId,
        name: &str,
    ) -> CanopyResult<()> {
        match self.read_domain_list(canister_id).await? {
            Some(mut names) => {
                names.retain(|n| n != name);
                self.write_domain_list(canister_id, &names).await
            }
            None => {
                debug!(canister_id = %canister_id, "no domain list asset to update");
                Ok(())
            }
        }
    }
}

fn validate_domain_name(name: &str) -> CanopyResult<()> {
    if name.is_empty() {
        return Err(CanopyError::validation("domain name is empty"));
    }
    if name.len() > MAX_DOMAIN_LENGTH {
        return Err(CanopyError::validation(format!(
            "domain name exceeds {MAX_DOMAIN_LENGTH} characters"
        )));
    }
    if !name.contains('.') || name.contains(char::is_whitespace) {
        return Err(CanopyError::validation(format!(
            "invalid domain name: {name}"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for DomainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainManager").finish_non_exhaustive()
    }
}
