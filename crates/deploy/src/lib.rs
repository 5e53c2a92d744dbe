//! relaymint-deploy - Resumable token deployment through a fee-paying relay.
//!
//! A deployment is four dependent on-ledger steps: create the asset, mint its supply,
//! attach metadata and lock its authorities. Each step reconciles against live ledger
//! state before acting, so any step can be re-run safely after a crash or a partial
//! failure. Operations are signed locally and submitted through a relay that pays
//! the fees.

pub mod checkpoint;
pub mod config;
mod error;
mod fingerprint;
mod fs;
pub mod identity;
pub mod ledger;
pub mod operation;
pub mod orchestrator;
pub mod relay;
pub mod report;
pub mod steps;
pub mod types;

#[cfg(test)]
mod testing;

pub use checkpoint::{CheckpointStore, DeploymentRecord, FileCheckpointStore};
pub use config::{CONFIG_FILENAME, DeployConfig, Settings};
pub use error::{DeployError, RelayError, Result};
pub use fingerprint::DeploymentFingerprint;
pub use identity::{Identity, IdentityStore};
pub use ledger::{Ledger, RpcLedger};
pub use operation::{OperationBuilder, StandardOperationBuilder};
pub use orchestrator::{Command, CommandOutcome, Orchestrator, RunReport, StepFailure};
pub use relay::{HttpRelay, RelaySubmitter, RelayTransport, RetryPolicy};
pub use report::{RollbackReport, StatusReport};
pub use steps::StepOutcome;
pub use types::{Address, AuthorityPolicy, AuthoritySlot, Signature, Step};
