//! Error taxonomy for the deployment core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Signature, Step};

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Failure of a single hand-off to the relay.
///
/// Only [`RelayError::Transport`] and [`RelayError::Rejected`] are retried by the
/// submitter. A deterministic ledger rejection surfaces immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("relay rejected the submission: {0}")]
    Rejected(String),

    #[error("ledger rejected the operation: {0}")]
    LedgerRejected(String),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RelayError::LedgerRejected(_))
    }
}

/// Errors surfaced to the orchestrator boundary.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("{step}: precondition unmet: {reason}")]
    PreconditionUnmet { step: Step, reason: String },

    #[error("relay exhausted after {attempts} attempt(s): {last}")]
    RelayExhausted {
        attempts: usize,
        #[source]
        last: RelayError,
    },

    #[error(
        "operation {signature} was not confirmed before its anchor expired (last valid height {last_valid_height})"
    )]
    ConfirmationTimeout {
        signature: Signature,
        last_valid_height: u64,
    },

    #[error("ledger rejected the operation: {0}")]
    LedgerRejected(String),

    #[error("ledger query {method} failed: {reason}")]
    LedgerUnavailable { method: String, reason: String },

    #[error("storage failure at {}: {reason}", .path.display())]
    StorageFailure { path: PathBuf, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn precondition(step: Step, reason: impl Into<String>) -> Self {
        DeployError::PreconditionUnmet {
            step,
            reason: reason.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DeployError::StorageFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether re-invoking the failed step is safe without operator intervention.
    ///
    /// Every step reconciles against the ledger before submitting, so transport
    /// and expiry failures can simply be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployError::RelayExhausted { .. }
                | DeployError::ConfirmationTimeout { .. }
                | DeployError::LedgerUnavailable { .. }
        )
    }
}
