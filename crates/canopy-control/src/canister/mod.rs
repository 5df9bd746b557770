//! Canister RPC seam.
//!
//! The [`CanisterClient`] trait covers every replica-side effect the control
//! plane performs: creating canisters from the shared cycles pool, installing
//! wasm modules, storing and reading assets, checking status, and topping up.
//! The real implementation talks to the Internet Computer through `ic-agent`;
//! [`MockCanisterClient`] backs the tests.

mod agent;

pub use agent::IcAgentClient;

use async_trait::async_trait;

use crate::error::CanopyResult;
use crate::types::{CanisterId, Cycles};

/// Result of creating a canister from the cycles pool.
#[derive(Debug, Clone)]
pub struct CreatedCanister {
    /// Principal of the new canister.
    pub canister_id: CanisterId,
    /// Ledger block that recorded the creation.
    pub block_id: String,
}

/// Wasm installation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// First install on an empty canister.
    Install,
    /// Replace the module (and wipe state) on an existing canister.
    Reinstall,
}

/// One asset to store on an asset canister.
#[derive(Debug, Clone)]
pub struct AssetUpload {
    /// Asset key, e.g. `/index.html`.
    pub key: String,
    /// Raw file contents.
    pub content: Vec<u8>,
    /// MIME type served with the asset.
    pub content_type: String,
}

/// Observed status of a canister.
#[derive(Debug, Clone, Copy)]
pub struct CanisterStatus {
    /// Whether the canister is running.
    pub running: bool,
    /// Current cycles balance. Zero when the canister is frozen out of
    /// cycles and refuses status calls.
    pub cycles: Cycles,
}

/// Client for canister management and asset operations.
#[async_trait]
pub trait CanisterClient: Send + Sync {
    /// Create a new canister funded with `cycles` from the shared pool.
    async fn create_canister(&self, cycles: Cycles) -> CanopyResult<CreatedCanister>;

    /// Install or reinstall a wasm module on a canister.
    async fn install_code(
        &self,
        canister_id: &CanisterId,
        wasm: &[u8],
        mode: InstallMode,
    ) -> CanopyResult<()>;

    /// Hash of the module currently installed, or `None` for an empty
    /// canister.
    async fn module_hash(&self, canister_id: &CanisterId) -> CanopyResult<Option<Vec<u8>>>;

    /// Store an asset on an asset canister, replacing any previous content
    /// under the same key.
    async fn store_asset(&self, canister_id: &CanisterId, asset: &AssetUpload) -> CanopyResult<()>;

    /// Read an asset's identity-encoded content, or `None` if the key does
    /// not exist.
    async fn read_asset(
        &self,
        canister_id: &CanisterId,
        key: &str,
    ) -> CanopyResult<Option<Vec<u8>>>;

    /// Current status and cycles balance of a canister.
    ///
    /// Implementations report a zero balance for canisters that are frozen
    /// out of cycles instead of failing.
    async fn status(&self, canister_id: &CanisterId) -> CanopyResult<CanisterStatus>;

    /// Withdraw `amount` cycles from the shared pool into a canister.
    async fn withdraw(&self, canister_id: &CanisterId, amount: Cycles) -> CanopyResult<()>;
}

pub use mock::MockCanisterClient;

mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{CanopyError, CanopyResult};
    use crate::types::{CanisterId, Cycles};

    use super::{AssetUpload, CanisterClient, CanisterStatus, CreatedCanister, InstallMode};

    #[derive(Default)]
    struct MockState {
        created: Vec<CanisterId>,
        installs: Vec<(CanisterId, InstallMode)>,
        module_hashes: HashMap<String, Vec<u8>>,
        assets: HashMap<(String, String), AssetUpload>,
        cycles: HashMap<String, Cycles>,
        withdrawals: Vec<(CanisterId, Cycles)>,
        pool_exhausted: Option<Cycles>,
        freeze_balance_on_withdraw: bool,
    }

    /// In-memory canister client for tests.
    ///
    /// Tracks creations, installs, stored assets, and withdrawals so tests
    /// can assert on exactly which replica calls were made.
    #[derive(Default)]
    pub struct MockCanisterClient {
        state: Mutex<MockState>,
    }

    impl MockCanisterClient {
        /// Create an empty mock.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> CanopyResult<std::sync::MutexGuard<'_, MockState>> {
            self.state
                .lock()
                .map_err(|_| CanopyError::internal("lock poisoned"))
        }

        /// Make pool operations fail with `InsufficientFunds` at the given
        /// remaining balance.
        pub fn exhaust_pool(&self, balance: Cycles) {
            if let Ok(mut state) = self.lock() {
                state.pool_exhausted = Some(balance);
            }
        }

        /// Make withdrawals succeed without ever changing the canister
        /// balance, so confirmation polls never observe a change.
        pub fn freeze_balance_on_withdraw(&self) {
            if let Ok(mut state) = self.lock() {
                state.freeze_balance_on_withdraw = true;
            }
        }

        /// Pre-seed a module hash, as if the canister already has code.
        pub fn set_module_hash(&self, canister_id: &CanisterId, hash: Vec<u8>) {
            if let Ok(mut state) = self.lock() {
                state.module_hashes.insert(canister_id.as_str().to_owned(), hash);
            }
        }

        /// Set a canister's cycles balance.
        pub fn set_cycles(&self, canister_id: &CanisterId, cycles: Cycles) {
            if let Ok(mut state) = self.lock() {
                state.cycles.insert(canister_id.as_str().to_owned(), cycles);
            }
        }

        /// Number of canisters created so far.
        pub fn created_count(&self) -> usize {
            self.lock().map(|s| s.created.len()).unwrap_or(0)
        }

        /// Install calls made so far.
        pub fn installs(&self) -> Vec<(CanisterId, InstallMode)> {
            self.lock().map(|s| s.installs.clone()).unwrap_or_default()
        }

        /// Withdrawals made so far.
        pub fn withdrawals(&self) -> Vec<(CanisterId, Cycles)> {
            self.lock().map(|s| s.withdrawals.clone()).unwrap_or_default()
        }

        /// Get a stored asset by canister and key.
        pub fn asset(&self, canister_id: &CanisterId, key: &str) -> Option<AssetUpload> {
            self.lock()
                .ok()?
                .assets
                .get(&(canister_id.as_str().to_owned(), key.to_owned()))
                .cloned()
        }

        /// All asset keys stored on a canister, sorted.
        pub fn asset_keys(&self, canister_id: &CanisterId) -> Vec<String> {
            let mut keys: Vec<String> = match self.lock() {
                Ok(state) => state
                    .assets
                    .keys()
                    .filter(|(c, _)| c == canister_id.as_str())
                    .map(|(_, k)| k.clone())
                    .collect(),
                Err(_) => Vec::new(),
            };
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl CanisterClient for MockCanisterClient {
        async fn create_canister(&self, cycles: Cycles) -> CanopyResult<CreatedCanister> {
            let mut state = self.lock()?;
            if let Some(balance) = state.pool_exhausted {
                return Err(CanopyError::InsufficientFunds { balance });
            }
            let n = state.created.len() + 1;
            let canister_id = CanisterId::new(format!("mock-canister-{n}"));
            state.created.push(canister_id.clone());
            state.cycles.insert(canister_id.as_str().to_owned(), cycles);
            Ok(CreatedCanister {
                canister_id,
                block_id: format!("block-{n}"),
            })
        }

        async fn install_code(
            &self,
            canister_id: &CanisterId,
            wasm: &[u8],
            mode: InstallMode,
        ) -> CanopyResult<()> {
            let mut state = self.lock()?;
            state.installs.push((canister_id.clone(), mode));
            let hash: Vec<u8> = {
                use sha2::Digest;
                sha2::Sha256::digest(wasm).to_vec()
            };
            state
                .module_hashes
                .insert(canister_id.as_str().to_owned(), hash);
            Ok(())
        }

        async fn module_hash(&self, canister_id: &CanisterId) -> CanopyResult<Option<Vec<u8>>> {
            let state = self.lock()?;
            Ok(state.module_hashes.get(canister_id.as_str()).cloned())
        }

        async fn store_asset(
            &self,
            canister_id: &CanisterId,
            asset: &AssetUpload,
        ) -> CanopyResult<()> {
            let mut state = self.lock()?;
            state.assets.insert(
                (canister_id.as_str().to_owned(), asset.key.clone()),
                asset.clone(),
            );
            Ok(())
        }

        async fn read_asset(
            &self,
            canister_id: &CanisterId,
            key: &str,
        ) -> CanopyResult<Option<Vec<u8>>> {
            let state = self.lock()?;
            Ok(state
                .assets
                .get(&(canister_id.as_str().to_owned(), key.to_owned()))
                .map(|a| a.content.clone()))
        }

        async fn status(&self, canister_id: &CanisterId) -> CanopyResult<CanisterStatus> {
            let state = self.lock()?;
            let cycles = state
                .cycles
                .get(canister_id.as_str())
                .copied()
                .unwrap_or(0);
            Ok(CanisterStatus {
                running: true,
                cycles,
            })
        }

        async fn withdraw(&self, canister_id: &CanisterId, amount: Cycles) -> CanopyResult<()> {
            let mut state = self.lock()?;
            if let Some(balance) = state.pool_exhausted {
                return Err(CanopyError::InsufficientFunds { balance });
            }
            state.withdrawals.push((canister_id.clone(), amount));
            if !state.freeze_balance_on_withdraw {
                let entry = state
                    .cycles
                    .entry(canister_id.as_str().to_owned())
                    .or_insert(0);
                *entry += amount;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_creates_distinct_canisters() {
        let client = MockCanisterClient::new();
        let a = client.create_canister(100).await.expect("create failed");
        let b = client.create_canister(100).await.expect("create failed");
        assert_ne!(a.canister_id, b.canister_id);
        assert_eq!(client.created_count(), 2);
    }

    #[tokio::test]
    async fn mock_tracks_module_hash() {
        let client = MockCanisterClient::new();
        let created = client.create_canister(100).await.expect("create failed");

        assert!(client
            .module_hash(&created.canister_id)
            .await
            .expect("hash failed")
            .is_none());

        client
            .install_code(&created.canister_id, b"wasm-bytes", InstallMode::Install)
            .await
            .expect("install failed");

        let hash = client
            .module_hash(&created.canister_id)
            .await
            .expect("hash failed")
            .expect("no hash after install");
        assert_eq!(hash.len(), 32);
    }

    #[tokio::test]
    async fn mock_exhausted_pool_rejects_creation() {
        let client = MockCanisterClient::new();
        client.exhaust_pool(42);
        let err = client.create_canister(100).await.expect_err("should fail");
        assert!(matches!(
            err,
            crate::error::CanopyError::InsufficientFunds { balance: 42 }
        ));
    }

    #[tokio::test]
    async fn mock_withdraw_raises_balance() {
        let client = MockCanisterClient::new();
        let created = client.create_canister(100).await.expect("create failed");
        client
            .withdraw(&created.canister_id, 50)
            .await
            .expect("withdraw failed");
        let status = client
            .status(&created.canister_id)
            .await
            .expect("status failed");
        assert_eq!(status.cycles, 150);
    }
}
