//! The four deployment steps.
//!
//! Every step reconciles against live ledger state before submitting anything: if the
//! step's effect is already visible it is recorded and reported as
//! [`StepOutcome::AlreadyComplete`]. This makes each step safe to re-run after a
//! crash, a stale checkpoint or a duplicate invocation.

mod create_asset;
mod lock_authorities;
mod mint_supply;
mod set_metadata;

use std::{collections::BTreeSet, fmt, future::Future};

pub use create_asset::CreateAsset;
pub use lock_authorities::LockAuthorities;
pub use mint_supply::MintSupply;
pub use set_metadata::SetMetadata;

use crate::{
    checkpoint::{CheckpointStore, DeploymentRecord},
    config::Settings,
    error::{DeployError, Result},
    fingerprint::DeploymentFingerprint,
    identity::Identity,
    ledger::Ledger,
    operation::{Operation, OperationBuilder},
    relay::{RelaySubmitter, RelayTransport},
    types::{AccountState, Address, AssetAccount, Signature, Step, base_units},
};

/// Result of running one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step's effect was already present; nothing was submitted.
    AlreadyComplete,
    /// An operation was submitted and settled (or simulated, in dry-run mode).
    Applied(Signature),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::AlreadyComplete => write!(f, "already complete"),
            StepOutcome::Applied(signature) if signature.is_dry_run() => {
                write!(f, "simulated (dry run)")
            }
            StepOutcome::Applied(signature) => write!(f, "applied ({})", signature),
        }
    }
}

/// A single deployment step.
pub trait StepExecutor {
    const STEP: Step;

    fn execute<L: Ledger, T: RelayTransport>(
        ctx: &mut StepContext<'_, L, T>,
    ) -> impl Future<Output = Result<StepOutcome>> + Send;
}

/// Run `step` against `ctx`.
pub async fn execute<L: Ledger, T: RelayTransport>(
    step: Step,
    ctx: &mut StepContext<'_, L, T>,
) -> Result<StepOutcome> {
    tracing::info!(step = %step, "Running step: {}", step.label());
    let outcome = match step {
        Step::CreateAsset => CreateAsset::execute(ctx).await,
        Step::MintSupply => MintSupply::execute(ctx).await,
        Step::SetMetadata => SetMetadata::execute(ctx).await,
        Step::LockAuthorities => LockAuthorities::execute(ctx).await,
    }?;
    tracing::info!(step = %step, outcome = %outcome, "Step finished");
    Ok(outcome)
}

/// Everything a step needs for one invocation.
///
/// The context holds a working copy of the deployment record. Steps write it back
/// through the checkpoint store before reporting success, except in dry-run mode where
/// progress is only simulated in memory.
pub struct StepContext<'a, L, T> {
    pub settings: &'a Settings,
    pub identity: &'a Identity,
    pub ledger: &'a L,
    pub submitter: &'a RelaySubmitter<T>,
    pub builder: &'a dyn OperationBuilder,
    pub store: &'a dyn CheckpointStore,
    pub record: DeploymentRecord,
    /// Steps "applied" by this dry run.
    pub simulated: BTreeSet<Step>,
}

impl<'a, L: Ledger, T: RelayTransport> StepContext<'a, L, T> {
    pub fn is_dry_run(&self) -> bool {
        self.submitter.is_dry_run()
    }

    /// Owner of the minted supply.
    pub fn treasury(&self) -> Address {
        self.settings.treasury.unwrap_or_else(|| self.identity.address())
    }

    /// Target supply in base units at `decimals`.
    pub fn target_supply(&self, step: Step, decimals: u8) -> Result<u64> {
        base_units(self.settings.token.total_supply, decimals).ok_or_else(|| {
            DeployError::precondition(
                step,
                format!(
                    "total supply {} does not fit in 64 bits at {} decimals",
                    self.settings.token.total_supply, decimals
                ),
            )
        })
    }

    /// The recorded asset and its live state.
    ///
    /// In a dry run an asset whose creation was only simulated is presented as freshly
    /// created: configured precision, deployer-held authorities and no supply beyond what
    /// the dry run itself simulated. A live asset is shown with any simulated mint applied.
    pub async fn asset(&self, step: Step) -> Result<(Address, AssetAccount)> {
        let Some(asset) = self.record.asset_address else {
            return Err(DeployError::precondition(
                step,
                format!("asset has not been created, run {} first", Step::CreateAsset),
            ));
        };

        match self.ledger.account(&asset).await? {
            Some(AccountState::Asset(mut account)) => {
                if self.simulated.contains(&Step::MintSupply) {
                    let target = self.target_supply(step, account.decimals)?;
                    account.supply = account.supply.max(target);
                }
                Ok((asset, account))
            }
            Some(_) => Err(DeployError::precondition(
                step,
                format!("account {} is not an asset", asset),
            )),
            None if self.simulated.contains(&Step::CreateAsset) => {
                let decimals = self.settings.token.decimals;
                let supply = if self.simulated.contains(&Step::MintSupply) {
                    self.target_supply(step, decimals)?
                } else {
                    0
                };
                Ok((
                    asset,
                    AssetAccount {
                        decimals,
                        supply,
                        mint_authority: Some(self.identity.address()),
                        freeze_authority: Some(self.identity.address()),
                    },
                ))
            }
            None => Err(DeployError::precondition(
                step,
                format!("recorded asset {} does not exist on the ledger", asset),
            )),
        }
    }

    /// Submit `operation`, signed by the deployer plus `extra_signers`.
    pub async fn submit(&self, operation: &Operation, extra_signers: &[&Identity]) -> Result<Signature> {
        let mut signers = Vec::with_capacity(extra_signers.len() + 1);
        signers.push(self.identity);
        signers.extend_from_slice(extra_signers);
        self.submitter.submit(self.ledger, operation, &signers).await
    }

    /// Mark `step` complete and persist the record.
    pub fn complete(&mut self, step: Step, signature: Option<Signature>) -> Result<()> {
        if self.is_dry_run() && signature.as_ref().is_some_and(Signature::is_dry_run) {
            self.simulated.insert(step);
            self.record.mark(step, None);
        } else {
            self.record.mark(step, signature);
        }
        self.persist()
    }

    /// Write the working record back through the store. A no-op in dry-run mode.
    pub fn persist(&mut self) -> Result<()> {
        if self.is_dry_run() {
            tracing::debug!(key = %self.record.key, "Dry run: checkpoint not written");
            return Ok(());
        }
        self.record.config_hash =
            Some(DeploymentFingerprint::from_settings(self.settings).compute_hash()?);
        self.record.touch();
        self.store.write(&self.record)
    }
}
