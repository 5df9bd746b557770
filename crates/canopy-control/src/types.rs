//! Core types for canopy-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cycles balance of a canister or the shared pool.
pub type Cycles = u128;

/// Unique identifier for a deployment.
///
/// Deployment ids are assigned by the caller, not generated here. The same
/// id is reused when a failed deployment is resubmitted, which is what makes
/// retries reuse the existing canister instead of provisioning a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(i64);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Textual principal of a canister on the Internet Computer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanisterId(String);

impl CanisterId {
    /// Create a new canister ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CanisterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Deployment created, waiting for the first attempt.
    Pending,
    /// An attempt is running (or was interrupted mid-run).
    InProgress,
    /// Content is live on the canister.
    Completed,
    /// Deployment was removed.
    Deleted,
    /// The last attempt failed; the same id may be resubmitted.
    Failed,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "deleted" => Ok(Self::Deleted),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// A deployment as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Caller-assigned deployment identifier.
    pub id: DeploymentId,
    /// Owning user.
    pub user_id: i64,
    /// Canister hosting the content. Created once, immutable thereafter.
    pub canister_id: CanisterId,
    /// Ledger block reference from canister creation.
    pub block_id: String,
    /// Local path of the content tree to upload.
    pub folder_path: String,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Error message from the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the deployment last completed.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Last observed cycles balance.
    pub remaining_cycles: Option<Cycles>,
    /// When the balance was last checked.
    pub last_status_check_at: DateTime<Utc>,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When the deployment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a new record for a first deployment attempt.
    ///
    /// Rows are created already `InProgress`: the orchestrator inserts them
    /// right after canister creation, at the start of the attempt.
    #[must_use]
    pub fn new(
        id: DeploymentId,
        user_id: i64,
        canister_id: CanisterId,
        block_id: String,
        folder_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            canister_id,
            block_id,
            folder_path,
            status: DeploymentStatus::InProgress,
            error: None,
            deployed_at: None,
            remaining_cycles: None,
            last_status_check_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registration state of a custom domain at the external authority.
///
/// Transitions are driven entirely by polling the authority; the reconciler
/// only mirrors what the authority reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// The registration request has been submitted and is waiting to be picked up.
    PendingOrder,
    /// The certificate has been ordered.
    PendingChallengeResponse,
    /// The ACME challenge has been completed.
    PendingAcmeApproval,
    /// The registration request has been successfully processed.
    Available,
    /// The registration request failed.
    Failed,
}

impl RegistrationStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingOrder => "PendingOrder",
            Self::PendingChallengeResponse => "PendingChallengeResponse",
            Self::PendingAcmeApproval => "PendingAcmeApproval",
            Self::Available => "Available",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingOrder" => Ok(Self::PendingOrder),
            "PendingChallengeResponse" => Ok(Self::PendingChallengeResponse),
            "PendingAcmeApproval" => Ok(Self::PendingAcmeApproval),
            "Available" => Ok(Self::Available),
            "Failed" => Ok(Self::Failed),
            _ => Err(format!("unknown registration status: {s}")),
        }
    }
}

/// A custom domain as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Generated identifier.
    pub id: i64,
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// Domain name, unique within the deployment.
    pub name: String,
    /// Identifier assigned by the registration authority.
    pub registration_id: String,
    /// Last known registration state.
    pub registration_status: RegistrationStatus,
    /// Failure payload reported by the authority, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<String>,
    /// When the domain was added.
    pub created_at: DateTime<Utc>,
    /// When the domain was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields needed to persist a new domain.
#[derive(Debug, Clone)]
pub struct NewDomain {
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// Domain name.
    pub name: String,
    /// Identifier assigned by the registration authority.
    pub registration_id: String,
    /// Initial registration state.
    pub registration_status: RegistrationStatus,
}

/// Terminal status of a top-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStatus {
    /// Row created, withdrawal not yet confirmed.
    Pending,
    /// Withdrawal confirmed, post-balance recorded.
    Completed,
    /// Withdrawal or confirmation failed.
    Failed,
}

impl TopUpStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TopUpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown top-up status: {s}")),
        }
    }
}

/// One top-up attempt in the append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRecord {
    /// Generated identifier.
    pub id: i64,
    /// Deployment whose canister was topped up.
    pub deployment_id: DeploymentId,
    /// Target canister.
    pub canister_id: CanisterId,
    /// Requested amount in cycles.
    pub amount: Cycles,
    /// Balance observed before the withdrawal.
    pub cycles_before: Cycles,
    /// Balance observed after the withdrawal settled.
    pub cycles_after: Option<Cycles>,
    /// Terminal status of the attempt.
    pub status: TopUpStatus,
    /// Error message if the attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the attempt started.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a new top-up attempt.
#[derive(Debug, Clone)]
pub struct NewTopUp {
    /// Deployment whose canister is being topped up.
    pub deployment_id: DeploymentId,
    /// Target canister.
    pub canister_id: CanisterId,
    /// Requested amount in cycles.
    pub amount: Cycles,
    /// Balance observed before the withdrawal.
    pub cycles_before: Cycles,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_status_round_trip() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::InProgress,
            DeploymentStatus::Completed,
            DeploymentStatus::Deleted,
            DeploymentStatus::Failed,
        ] {
            let parsed: DeploymentStatus = status.as_str().parse().expect("parse failed");
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn registration_status_round_trip() {
        for status in [
            RegistrationStatus::PendingOrder,
            RegistrationStatus::PendingChallengeResponse,
            RegistrationStatus::PendingAcmeApproval,
            RegistrationStatus::Available,
            RegistrationStatus::Failed,
        ] {
            let parsed: RegistrationStatus = status.as_str().parse().expect("parse failed");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn new_record_starts_in_progress() {
        let record = DeploymentRecord::new(
            DeploymentId::new(7),
            42,
            CanisterId::new("aaaaa-aa"),
            "123".to_owned(),
            "/tmp/site".to_owned(),
        );
        assert_eq!(record.status, DeploymentStatus::InProgress);
        assert!(record.deployed_at.is_none());
        assert!(record.remaining_cycles.is_none());
    }
}
