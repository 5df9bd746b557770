//! The deployment orchestrator.
//!
//! A deployment takes a local content tree and puts it live on an asset
//! canister: create (or reuse) the canister, install the frontend wasm,
//! upload every file, and finish with the asset configuration manifest.
//! The whole attempt is reported as a single success or failure against
//! the deployment record.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::alert::AlertNotifier;
use crate::canister::{AssetUpload, CanisterClient, InstallMode};
use crate::config::CanisterConfig;
use crate::error::{CanopyError, CanopyResult};
use crate::store::DeploymentStore;
use crate::types::{CanisterId, Cycles, DeploymentId, DeploymentRecord, DeploymentStatus};
use crate::util::{collect_files, content_type_for, cycles_to_tc};

/// Files uploaded concurrently per batch.
const UPLOAD_BATCH_SIZE: usize = 5;

/// Delay between installing the wasm and the first asset upload. A freshly
/// installed asset canister rejects uploads until its certification state
/// settles.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Key of the asset configuration manifest.
const ASSET_MANIFEST_KEY: &str = "/.ic-assets.json5";

/// Manifest content: serve `.well-known` (needed for custom domains) and
/// apply the standard security policy everywhere.
const ASSET_MANIFEST: &str = r#"[
  {"match": ".well-known", "ignore": false},
  {"match": "**/*", "security_policy": "standard"}
]"#;

/// A request to deploy (or re-deploy) a content tree.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Caller-assigned deployment id. Resubmitting an id retries that
    /// deployment on its existing canister.
    pub deployment_id: DeploymentId,
    /// Owning user.
    pub user_id: i64,
    /// Local path of the content tree to upload.
    pub folder_path: String,
}

/// Runs deployments end to end.
pub struct DeploymentOrchestrator {
    store: Arc<dyn DeploymentStore>,
    canister: Arc<dyn CanisterClient>,
    alerts: Arc<AlertNotifier>,
    config: CanisterConfig,
}

impl DeploymentOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        canister: Arc<dyn CanisterClient>,
        alerts: Arc<AlertNotifier>,
        config: CanisterConfig,
    ) -> Self {
        Self {
            store,
            canister,
            alerts,
            config,
        }
    }

    /// Deploy a content tree, returning the hosting canister's id.
    ///
    /// On failure the deployment record is marked `Failed` with the error
    /// message, and the same id can be resubmitted to retry on the same
    /// canister.
    pub async fn deploy(&self, request: DeployRequest) -> CanopyResult<CanisterId> {
        let deployment_id = request.deployment_id;
        info!(deployment_id = %deployment_id, folder = %request.folder_path, "starting deployment");

        match self.execute(&request).await {
            Ok(canister_id) => {
                self.store.complete(deployment_id, Utc::now()).await?;
                info!(deployment_id = %deployment_id, canister_id = %canister_id, "deployment completed");
                Ok(canister_id)
            }
            Err(e) => {
                self.handle_failure(deployment_id, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &DeployRequest) -> CanopyResult<CanisterId> {
        let deployment_id = request.deployment_id;

        // Retries keep the canister from the previous attempt; only a
        // never-seen id provisions a new one from the cycles pool.
        let (canister_id, fresh) = match self.store.get(deployment_id).await? {
            Some(existing) => {
                info!(
                    deployment_id = %deployment_id,
                    canister_id = %existing.canister_id,
                    "retrying deployment on existing canister"
                );
                self.store
                    .restart(deployment_id, &request.folder_path)
                    .await?;
                (existing.canister_id, false)
            }
            None => {
                let created = self
                    .canister
                    .create_canister(Cycles::from(self.config.initial_cycles))
                    .await?;
                let record = DeploymentRecord::new(
                    deployment_id,
                    request.user_id,
                    created.canister_id.clone(),
                    created.block_id,
                    request.folder_path.clone(),
                );
                self.store.insert(&record).await?;
                info!(deployment_id = %deployment_id, canister_id = %created.canister_id, "canister created");
                (created.canister_id, true)
            }
        };

        let wasm = tokio::fs::read(&self.config.frontend_wasm_path).await?;
        self.install_frontend(&canister_id, &wasm, fresh).await?;
        self.upload_tree(&canister_id, Path::new(&request.folder_path))
            .await?;

        Ok(canister_id)
    }

    /// Install the frontend wasm, skipping the install (and the settle
    /// delay) when the canister already runs this exact module.
    async fn install_frontend(
        &self,
        canister_id: &CanisterId,
        wasm: &[u8],
        fresh: bool,
    ) -> CanopyResult<()> {
        if !fresh {
            let installed = self.canister.module_hash(canister_id).await?;
            let local: Vec<u8> = Sha256::digest(wasm).to_vec();
            if installed.as_deref() == Some(local.as_slice()) {
                debug!(canister_id = %canister_id, "module already installed, skipping install");
                return Ok(());
            }
        }

        let mode = if fresh {
            InstallMode::Install
        } else {
            InstallMode::Reinstall
        };
        self.canister.install_code(canister_id, wasm, mode).await?;
        debug!(canister_id = %canister_id, ?mode, "frontend installed");

        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Upload every file under `root` in concurrent batches, then the
    /// asset manifest.
    async fn upload_tree(&self, canister_id: &CanisterId, root: &Path) -> CanopyResult<()> {
        let files = collect_files(root)?;
        let total = files.len();

        for batch in files.chunks(UPLOAD_BATCH_SIZE) {
            try_join_all(
                batch
                    .iter()
                    .map(|path| self.upload_file(canister_id, root, path)),
            )
            .await?;
        }

        self.canister
            .store_asset(
                canister_id,
                &AssetUpload {
                    key: ASSET_MANIFEST_KEY.to_owned(),
                    content: ASSET_MANIFEST.as_bytes().to_vec(),
                    content_type: "application/json".to_owned(),
                },
            )
            .await?;

        debug!(canister_id = %canister_id, files = total, "content uploaded");
        Ok(())
    }

    async fn upload_file(
        &self,
        canister_id: &CanisterId,
        root: &Path,
        path: &Path,
    ) -> CanopyResult<()> {
        let relative = path.strip_prefix(root).map_err(|_| {
            CanopyError::internal(format!("file {} escapes content root", path.display()))
        })?;
        let content = tokio::fs::read(path).await?;

        self.canister
            .store_asset(
                canister_id,
                &AssetUpload {
                    key: format!("/{}", relative.display()),
                    content,
                    content_type: content_type_for(path).to_owned(),
                },
            )
            .await
    }

    async fn handle_failure(&self, deployment_id: DeploymentId, e: &CanopyError) {
        error!(deployment_id = %deployment_id, error = %e, "deployment failed");

        if let CanopyError::InsufficientFunds { balance } = e {
            self.alerts
                .notify(
                    "Deployment halted: cycles pool exhausted",
                    &format!(
                        "Current balance: {} TC (trillion cycles)",
                        cycles_to_tc(*balance)
                    ),
                    Some(serde_json::json!([
                        {"name": "deployment_id", "value": deployment_id.to_string()}
                    ])),
                )
                .await;
        }

        // The row may not exist if the attempt died before canister
        // creation finished.
        if let Err(store_err) = self
            .store
            .update_status(deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
            .await
        {
            warn!(deployment_id = %deployment_id, error = %store_err, "could not mark deployment failed");
        }
    }

    /// Look up a deployment, failing when it does not exist or does not
    /// match the requested status.
    pub async fn get_deployment(
        &self,
        id: DeploymentId,
        status: Option<DeploymentStatus>,
    ) -> CanopyResult<DeploymentRecord> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(CanopyError::DeploymentNotFound(id.get()))?;

        match status {
            Some(wanted) if record.status != wanted => {
                Err(CanopyError::DeploymentNotFound(id.get()))
            }
            _ => Ok(record),
        }
    }

    /// Whether a completed deployment with this id exists.
    pub async fn is_completed(&self, id: DeploymentId) -> CanopyResult<bool> {
        self.store.is_completed(id).await
    }
}

impl std::fmt::Debug for DeploymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentOrchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canister::MockCanisterClient;
    use crate::store::MemoryStore;

    struct Harness {
        orchestrator: DeploymentOrchestrator,
        store: Arc<MemoryStore>,
        canister: Arc<MockCanisterClient>,
        _content: tempfile::TempDir,
        _wasm: tempfile::TempDir,
        folder_path: String,
    }

    fn make_harness() -> Harness {
        let content = tempfile::tempdir().expect("tempdir failed");
        std::fs::write(content.path().join("index.html"), "<html></html>").expect("write failed");
        std::fs::write(content.path().join("style.css"), "body {}").expect("write failed");
        std::fs::create_dir(content.path().join("img")).expect("mkdir failed");
        std::fs::write(content.path().join("img").join("logo.png"), [1, 2, 3])
            .expect("write failed");

        let wasm_dir = tempfile::tempdir().expect("tempdir failed");
        let wasm_path = wasm_dir.path().join("frontend.wasm");
        std::fs::write(&wasm_path, b"fake wasm module").expect("write failed");

        let store = Arc::new(MemoryStore::new());
        let canister = Arc::new(MockCanisterClient::new());
        let config = CanisterConfig {
            frontend_wasm_path: wasm_path,
            ..CanisterConfig::default()
        };

        let orchestrator = DeploymentOrchestrator::new(
            store.clone(),
            canister.clone(),
            Arc::new(AlertNotifier::disabled()),
            config,
        );

        let folder_path = content.path().to_string_lossy().into_owned();
        Harness {
            orchestrator,
            store,
            canister,
            _content: content,
            _wasm: wasm_dir,
            folder_path,
        }
    }

    fn request(h: &Harness, id: i64) -> DeployRequest {
        DeployRequest {
            deployment_id: DeploymentId::new(id),
            user_id: 42,
            folder_path: h.folder_path.clone(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_uploads_every_file_and_the_manifest() {
        let h = make_harness();
        let canister_id = h
            .orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("deploy failed");

        let keys = h.canister.asset_keys(&canister_id);
        assert_eq!(
            keys,
            vec![
                "/.ic-assets.json5".to_owned(),
                "/img/logo.png".to_owned(),
                "/index.html".to_owned(),
                "/style.css".to_owned(),
            ]
        );

        let index = h.canister.asset(&canister_id, "/index.html").expect("missing asset");
        assert_eq!(index.content_type, "text/html");
        let logo = h.canister.asset(&canister_id, "/img/logo.png").expect("missing asset");
        assert_eq!(logo.content_type, "image/png");

        let record = h
            .orchestrator
            .get_deployment(DeploymentId::new(1), None)
            .await
            .expect("get failed");
        assert_eq!(record.status, DeploymentStatus::Completed);
        assert!(record.deployed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_reuses_the_canister() {
        let h = make_harness();
        let first = h
            .orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("deploy failed");
        let second = h
            .orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("redeploy failed");

        assert_eq!(first, second);
        assert_eq!(h.canister.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_module_hash_skips_reinstall() {
        let h = make_harness();
        h.orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("deploy failed");
        h.orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("redeploy failed");

        // First attempt installs; the retry sees the identical hash.
        let installs = h.canister.installs();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].1, InstallMode::Install);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_fails_before_any_record_exists() {
        let h = make_harness();
        h.canister.exhaust_pool(7);

        let err = h
            .orchestrator
            .deploy(request(&h, 1))
            .await
            .expect_err("deploy should fail");
        assert!(matches!(err, CanopyError::InsufficientFunds { balance: 7 }));
        assert!(
            DeploymentStore::get(h.store.as_ref(), DeploymentId::new(1))
                .await
                .expect("get failed")
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_marks_the_record() {
        let h = make_harness();
        h.orchestrator
            .deploy(request(&h, 1))
            .await
            .expect("deploy failed");

        let bad = DeployRequest {
            deployment_id: DeploymentId::new(1),
            user_id: 42,
            folder_path: "/definitely/not/here".to_owned(),
        };
        h.orchestrator.deploy(bad).await.expect_err("should fail");

        let record = h
            .orchestrator
            .get_deployment(DeploymentId::new(1), None)
            .await
            .expect("get failed");
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert!(record.error.is_some());
    }
}
