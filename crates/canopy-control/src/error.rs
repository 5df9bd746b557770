//! Error types for canopy-control.

use crate::types::Cycles;

/// Result type alias using [`CanopyError`].
pub type CanopyResult<T> = Result<T, CanopyError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum CanopyError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or rejected caller input.
    #[error("{0}")]
    Validation(String),

    /// Deployment not found.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(i64),

    /// Domain not found.
    #[error("domain not found: {0}")]
    DomainNotFound(i64),

    /// The shared cycles pool cannot fund the requested operation.
    #[error("insufficient funds in the cycles pool (balance: {balance} cycles)")]
    InsufficientFunds {
        /// Current balance of the shared pool.
        balance: Cycles,
    },

    /// A top-up was issued but the canister balance never changed.
    #[error("top-up confirmation timed out for canister {canister_id}")]
    TopUpTimeout {
        /// Canister whose balance was being polled.
        canister_id: String,
    },

    /// Canister RPC error.
    #[error("canister error: {0}")]
    Canister(String),

    /// Domain registration authority error.
    #[error("registration error: {0}")]
    Registration(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CanopyError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a canister RPC error.
    #[must_use]
    pub fn canister(msg: impl Into<String>) -> Self {
        Self::Canister(msg.into())
    }

    /// Create a registration authority error.
    #[must_use]
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
