//! `ic-agent`-backed [`CanisterClient`].
//!
//! Canister creation and top-ups go through the cycles ledger canister,
//! which funds both out of the account owned by the service identity.
//! Management operations (status, install) go through the management
//! canister, and asset operations call the asset canister's own interface.

use candid::{CandidType, Decode, Encode, Nat, Principal};
use ic_agent::identity::Secp256k1Identity;
use ic_agent::Agent;
use num_traits::cast::ToPrimitive;
use serde::Deserialize;
use tracing::debug;

use crate::config::CanisterConfig;
use crate::error::{CanopyError, CanopyResult};
use crate::types::{CanisterId, Cycles};

use super::{AssetUpload, CanisterClient, CanisterStatus, CreatedCanister, InstallMode};

#[derive(CandidType)]
struct CreateCanisterArgs {
    from_subaccount: Option<serde_bytes::ByteBuf>,
    created_at_time: Option<u64>,
    amount: Nat,
    creation_args: Option<()>,
}

#[derive(CandidType, Deserialize)]
struct CreateCanisterSuccess {
    block_id: Nat,
    canister_id: Principal,
}

#[derive(CandidType, Deserialize, Debug)]
enum CreateCanisterError {
    InsufficientFunds {
        balance: Nat,
    },
    TooOld,
    CreatedInFuture {
        ledger_time: u64,
    },
    TemporarilyUnavailable,
    Duplicate {
        duplicate_of: Nat,
        canister_id: Option<Principal>,
    },
    FailedToCreate {
        fee_block: Option<Nat>,
        refund_block: Option<Nat>,
        error: String,
    },
    GenericError {
        error_code: Nat,
        message: String,
    },
}

#[derive(CandidType)]
struct WithdrawArgs {
    from_subaccount: Option<serde_bytes::ByteBuf>,
    to: Principal,
    created_at_time: Option<u64>,
    amount: Nat,
}

#[derive(CandidType, Deserialize, Debug)]
enum WithdrawError {
    InsufficientFunds {
        balance: Nat,
    },
    TooOld,
    CreatedInFuture {
        ledger_time: u64,
    },
    TemporarilyUnavailable,
    Duplicate {
        duplicate_of: Nat,
    },
    FailedToWithdraw {
        rejection_code: i32,
        fee_block: Option<Nat>,
        rejection_reason: String,
    },
    GenericError {
        error_code: Nat,
        message: String,
    },
}

#[derive(CandidType)]
struct CanisterIdRecord {
    canister_id: Principal,
}

#[derive(CandidType, Deserialize)]
enum RunState {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "stopping")]
    Stopping,
    #[serde(rename = "stopped")]
    Stopped,
}

#[derive(CandidType, Deserialize)]
struct StatusReply {
    status: RunState,
    module_hash: Option<serde_bytes::ByteBuf>,
    cycles: Nat,
}

#[derive(CandidType, Deserialize)]
enum WireInstallMode {
    #[serde(rename = "install")]
    Install,
    #[serde(rename = "reinstall")]
    Reinstall,
}

#[derive(CandidType)]
struct InstallCodeArgs<'a> {
    mode: WireInstallMode,
    canister_id: Principal,
    wasm_module: &'a [u8],
    arg: Vec<u8>,
}

#[derive(CandidType)]
struct StoreArg<'a> {
    key: &'a str,
    content_type: &'a str,
    content_encoding: &'a str,
    content: &'a [u8],
    sha256: Option<serde_bytes::ByteBuf>,
}

#[derive(CandidType)]
struct GetArg<'a> {
    key: &'a str,
    accept_encodings: Vec<&'a str>,
}

#[derive(CandidType, Deserialize)]
struct GetReply {
    content: serde_bytes::ByteBuf,
}

const MANAGEMENT_CANISTER: Principal = Principal::management_canister();

fn nat_to_cycles(nat: &Nat) -> CanopyResult<Cycles> {
    nat.0
        .to_u128()
        .ok_or_else(|| CanopyError::canister(format!("cycles amount out of range: {nat}")))
}

fn parse_principal(canister_id: &CanisterId) -> CanopyResult<Principal> {
    Principal::from_text(canister_id.as_str())
        .map_err(|e| CanopyError::validation(format!("invalid canister id {canister_id}: {e}")))
}

/// [`CanisterClient`] that talks to a replica through `ic-agent`.
pub struct IcAgentClient {
    agent: Agent,
    ledger: Principal,
}

impl IcAgentClient {
    /// Build an agent from configuration and connect.
    pub async fn connect(config: &CanisterConfig) -> CanopyResult<Self> {
        let identity =
            Secp256k1Identity::from_pem_file(&config.identity_pem_path).map_err(|e| {
                CanopyError::Config(format!(
                    "cannot load identity from {}: {e}",
                    config.identity_pem_path.display()
                ))
            })?;

        let agent = Agent::builder()
            .with_url(&config.url)
            .with_identity(identity)
            .build()
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        // The root key is baked in for mainnet; local replicas sign with
        // their own key, which has to be fetched before any query.
        if config.fetch_root_key {
            agent
                .fetch_root_key()
                .await
                .map_err(|e| CanopyError::canister(e.to_string()))?;
        }

        let ledger = Principal::from_text(&config.ledger_canister_id).map_err(|e| {
            CanopyError::Config(format!(
                "invalid ledger canister id {}: {e}",
                config.ledger_canister_id
            ))
        })?;

        debug!(url = %config.url, ledger = %ledger, "connected canister client");

        Ok(Self { agent, ledger })
    }

    async fn canister_status(&self, target: Principal) -> CanopyResult<StatusReply> {
        let arg = Encode!(&CanisterIdRecord {
            canister_id: target
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        let bytes = self
            .agent
            .update(&MANAGEMENT_CANISTER, "canister_status")
            .with_effective_canister_id(target)
            .with_arg(arg)
            .call_and_wait()
            .await
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        Decode!(&bytes, StatusReply).map_err(|e| CanopyError::Serialisation(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CanisterClient for IcAgentClient {
    async fn create_canister(&self, cycles: Cycles) -> CanopyResult<CreatedCanister> {
        let arg = Encode!(&CreateCanisterArgs {
            from_subaccount: None,
            created_at_time: None,
            amount: Nat::from(cycles),
            creation_args: None,
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        let bytes = self
            .agent
            .update(&self.ledger, "create_canister")
            .with_arg(arg)
            .call_and_wait()
            .await
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        let result = Decode!(&bytes, Result<CreateCanisterSuccess, CreateCanisterError>)
            .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        match result {
            Ok(success) => Ok(CreatedCanister {
                canister_id: CanisterId::new(success.canister_id.to_text()),
                block_id: success.block_id.0.to_string(),
            }),
            Err(CreateCanisterError::InsufficientFunds { balance }) => {
                Err(CanopyError::InsufficientFunds {
                    balance: nat_to_cycles(&balance)?,
                })
            }
            Err(other) => Err(CanopyError::canister(format!(
                "create_canister failed: {other:?}"
            ))),
        }
    }

    async fn install_code(
        &self,
        canister_id: &CanisterId,
        wasm: &[u8],
        mode: InstallMode,
    ) -> CanopyResult<()> {
        let target = parse_principal(canister_id)?;
        let wire_mode = match mode {
            InstallMode::Install => WireInstallMode::Install,
            InstallMode::Reinstall => WireInstallMode::Reinstall,
        };

        let arg = Encode!(&InstallCodeArgs {
            mode: wire_mode,
            canister_id: target,
            wasm_module: wasm,
            arg: Encode!().map_err(|e| CanopyError::Serialisation(e.to_string()))?,
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        self.agent
            .update(&MANAGEMENT_CANISTER, "install_code")
            .with_effective_canister_id(target)
            .with_arg(arg)
            .call_and_wait()
            .await
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        Ok(())
    }

    async fn module_hash(&self, canister_id: &CanisterId) -> CanopyResult<Option<Vec<u8>>> {
        let target = parse_principal(canister_id)?;
        let reply = self.canister_status(target).await?;
        Ok(reply.module_hash.map(serde_bytes::ByteBuf::into_vec))
    }

    async fn store_asset(&self, canister_id: &CanisterId, asset: &AssetUpload) -> CanopyResult<()> {
        let target = parse_principal(canister_id)?;

        let arg = Encode!(&StoreArg {
            key: &asset.key,
            content_type: &asset.content_type,
            content_encoding: "identity",
            content: &asset.content,
            sha256: None,
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        self.agent
            .update(&target, "store")
            .with_arg(arg)
            .call_and_wait()
            .await
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        Ok(())
    }

    async fn read_asset(
        &self,
        canister_id: &CanisterId,
        key: &str,
    ) -> CanopyResult<Option<Vec<u8>>> {
        let target = parse_principal(canister_id)?;

        let arg = Encode!(&GetArg {
            key,
            accept_encodings: vec!["identity"],
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        let result = self
            .agent
            .query(&target, "get")
            .with_arg(arg)
            .call()
            .await;

        match result {
            Ok(bytes) => {
                let reply = Decode!(&bytes, GetReply)
                    .map_err(|e| CanopyError::Serialisation(e.to_string()))?;
                Ok(Some(reply.content.into_vec()))
            }
            // The asset canister traps on missing keys rather than
            // returning an option.
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("asset not found") || msg.contains("no such encoding") {
                    Ok(None)
                } else {
                    Err(CanopyError::canister(msg))
                }
            }
        }
    }

    async fn status(&self, canister_id: &CanisterId) -> CanopyResult<CanisterStatus> {
        let target = parse_principal(canister_id)?;

        match self.canister_status(target).await {
            Ok(reply) => Ok(CanisterStatus {
                running: matches!(reply.status, RunState::Running),
                cycles: nat_to_cycles(&reply.cycles)?,
            }),
            // A canister frozen out of cycles rejects the status call
            // itself; report it as an empty balance so the monitor tops
            // it up instead of erroring out.
            Err(CanopyError::Canister(msg)) if msg.contains("out of cycles") => {
                Ok(CanisterStatus {
                    running: false,
                    cycles: 0,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn withdraw(&self, canister_id: &CanisterId, amount: Cycles) -> CanopyResult<()> {
        let target = parse_principal(canister_id)?;

        let arg = Encode!(&WithdrawArgs {
            from_subaccount: None,
            to: target,
            created_at_time: None,
            amount: Nat::from(amount),
        })
        .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        let bytes = self
            .agent
            .update(&self.ledger, "withdraw")
            .with_arg(arg)
            .call_and_wait()
            .await
            .map_err(|e| CanopyError::canister(e.to_string()))?;

        let result = Decode!(&bytes, Result<Nat, WithdrawError>)
            .map_err(|e| CanopyError::Serialisation(e.to_string()))?;

        match result {
            Ok(block) => {
                debug!(canister_id = %canister_id, block = %block, "withdrawal recorded");
                Ok(())
            }
            Err(WithdrawError::InsufficientFunds { balance }) => {
                Err(CanopyError::InsufficientFunds {
                    balance: nat_to_cycles(&balance)?,
                })
            }
            Err(other) => Err(CanopyError::canister(format!("withdraw failed: {other:?}"))),
        }
    }
}

impl std::fmt::Debug for IcAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcAgentClient")
            .field("ledger", &self.ledger.to_text())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nat_conversion() {
        assert_eq!(
            nat_to_cycles(&Nat::from(800_000_000_000_u64)).expect("conversion failed"),
            800_000_000_000
        );
    }

    #[test]
    fn principal_parse_rejects_garbage() {
        assert!(parse_principal(&CanisterId::new("not a principal")).is_err());
    }
}
