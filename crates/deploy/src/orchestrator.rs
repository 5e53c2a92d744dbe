//! Sequencing of the deployment steps and the command surface around them.

use std::fmt;

use thiserror::Error;

use crate::{
    checkpoint::{CheckpointStore, DeploymentRecord},
    config::Settings,
    error::{DeployError, Result},
    fingerprint::DeploymentFingerprint,
    identity::Identity,
    ledger::Ledger,
    operation::{OperationBuilder, StandardOperationBuilder},
    relay::{RelaySubmitter, RelayTransport},
    report::{AuthorityStatus, Residue, RollbackReport, StatusReport, StepStatus, SupplyStatus},
    steps::{self, StepContext, StepOutcome},
    types::{AccountState, Address, AssetAccount, AuthoritySlot, Step, base_units},
};

/// A request from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RunAll,
    RunStep(Step),
    Status,
    DryRunAll,
    Rollback,
    Exit,
}

/// Result of a [`Command`]. The hosting CLI decides how to exit.
#[derive(Debug)]
pub enum CommandOutcome {
    Ran(RunReport),
    Status(StatusReport),
    RolledBack(RollbackReport),
    Exit,
    Failed(DeployError),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            CommandOutcome::Ran(report) => report.is_success(),
            CommandOutcome::Failed(_) => false,
            _ => true,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// A step that failed, with its cause.
#[derive(Error, Debug)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub source: DeployError,
}

/// Outcome of a run over one or more steps.
#[derive(Debug)]
pub struct RunReport {
    pub dry_run: bool,
    pub outcomes: Vec<(Step, StepOutcome)>,
    /// The step that stopped the run, if any.
    pub failure: Option<StepFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: nothing was submitted or recorded")?;
        }
        for (step, outcome) in &self.outcomes {
            writeln!(f, "  [ok] {}: {}", step.label(), outcome)?;
        }
        if let Some(failure) = &self.failure {
            writeln!(f, "  [FAILED] {}: {}", failure.step.label(), failure.source)?;
            if failure.source.is_retryable() {
                writeln!(f, "  The step is safe to re-run.")?;
            }
        }
        Ok(())
    }
}

/// Runs deployment steps for one deployment.
pub struct Orchestrator<'a, L, T> {
    settings: &'a Settings,
    identity: Identity,
    ledger: L,
    submitter: RelaySubmitter<T>,
    builder: &'a dyn OperationBuilder,
    store: &'a dyn CheckpointStore,
}

impl<'a, L: Ledger, T: RelayTransport> Orchestrator<'a, L, T> {
    pub fn new(
        settings: &'a Settings,
        identity: Identity,
        ledger: L,
        transport: T,
        store: &'a dyn CheckpointStore,
    ) -> Self {
        Self {
            submitter: RelaySubmitter::new(transport, &settings.relay, settings.dry_run),
            settings,
            identity,
            ledger,
            builder: &StandardOperationBuilder,
            store,
        }
    }

    pub fn with_builder(mut self, builder: &'a dyn OperationBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    /// Execute a command, folding errors into [`CommandOutcome::Failed`].
    pub async fn dispatch(&self, command: Command) -> CommandOutcome {
        let result = match command {
            Command::RunAll => self.run_all().await.map(CommandOutcome::Ran),
            Command::RunStep(step) => self.run_step(step).await.map(CommandOutcome::Ran),
            Command::DryRunAll => self.dry_run_all().await.map(CommandOutcome::Ran),
            Command::Status => self.status().await.map(CommandOutcome::Status),
            Command::Rollback => self.rollback().await.map(CommandOutcome::RolledBack),
            Command::Exit => Ok(CommandOutcome::Exit),
        };
        result.unwrap_or_else(CommandOutcome::Failed)
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run_all(&self) -> Result<RunReport> {
        self.run(&self.submitter, &Step::ALL).await
    }

    /// Run every step without submitting or recording anything.
    pub async fn dry_run_all(&self) -> Result<RunReport> {
        self.run(&self.submitter.preview(), &Step::ALL).await
    }

    pub async fn run_step(&self, step: Step) -> Result<RunReport> {
        self.run(&self.submitter, &[step]).await
    }

    async fn run<R: RelayTransport>(
        &self,
        submitter: &RelaySubmitter<R>,
        steps: &[Step],
    ) -> Result<RunReport> {
        let dry_run = submitter.is_dry_run();
        tracing::info!(
            deployment = %self.settings.deployment,
            identity = %self.identity.address(),
            dry_run,
            steps = steps.len(),
            "Starting deployment run"
        );

        let record = self.load()?;
        if let Some(recorded) = &record.config_hash {
            if *recorded != DeploymentFingerprint::from_settings(self.settings).compute_hash()? {
                tracing::warn!(
                    deployment = %self.settings.deployment,
                    "Token or authority settings changed since this deployment was last run"
                );
            }
        }

        let mut ctx = StepContext {
            settings: self.settings,
            identity: &self.identity,
            ledger: &self.ledger,
            submitter,
            builder: self.builder,
            store: self.store,
            record,
            simulated: Default::default(),
        };

        let mut report = RunReport {
            dry_run,
            outcomes: Vec::with_capacity(steps.len()),
            failure: None,
        };
        for &step in steps {
            match steps::execute(step, &mut ctx).await {
                Ok(outcome) => report.outcomes.push((step, outcome)),
                Err(source) => {
                    tracing::error!(step = %step, error = %source, "Step failed");
                    report.failure = Some(StepFailure { step, source });
                    break;
                }
            }
        }

        if report.is_success() {
            tracing::info!(deployment = %self.settings.deployment, "Deployment run finished");
        }
        Ok(report)
    }

    fn load(&self) -> Result<DeploymentRecord> {
        Ok(self
            .store
            .read(&self.settings.deployment)?
            .unwrap_or_else(|| DeploymentRecord::new(&self.settings.deployment)))
    }

    fn treasury(&self) -> Address {
        self.settings.treasury.unwrap_or_else(|| self.identity.address())
    }

    /// The deployment's asset: recorded, or pending but already on the ledger.
    async fn locate_asset(&self, record: &DeploymentRecord) -> Result<Option<(Address, Option<AssetAccount>)>> {
        let candidate = match (record.asset_address, &record.pending_asset) {
            (Some(asset), _) => asset,
            (None, Some(pending)) => pending.address,
            (None, None) => return Ok(None),
        };

        let account = match self.ledger.account(&candidate).await? {
            Some(AccountState::Asset(account)) => Some(account),
            _ => None,
        };
        if record.asset_address.is_none() && account.is_none() {
            return Ok(None);
        }
        Ok(Some((candidate, account)))
    }

    /// Live-reconciled view of the deployment. Reads only; never writes the checkpoint.
    pub async fn status(&self) -> Result<StatusReport> {
        let record = self.load()?;
        let treasury = self.treasury();
        let policy = self.settings.authority;
        let located = self.locate_asset(&record).await?;

        let mut report = StatusReport {
            deployment: self.settings.deployment.clone(),
            identity: self.identity.address(),
            treasury,
            policy,
            asset: located.as_ref().map(|(asset, _)| *asset),
            steps: Vec::with_capacity(Step::ALL.len()),
            supply: None,
            metadata: None,
            authorities: Vec::new(),
        };

        let mut created = false;
        let mut minted = false;
        let mut metadata_set = false;
        let mut locked = false;

        if let Some((asset, Some(account))) = &located {
            created = true;

            let target = base_units(self.settings.token.total_supply, account.decimals);
            let balance = self.ledger.balance(&Address::holding(&treasury, asset)).await?;
            minted = target.is_some_and(|t| balance == Some(t) || account.supply >= t);
            report.supply = Some(SupplyStatus {
                decimals: account.decimals,
                supply: account.supply,
                target,
                treasury_balance: balance,
            });

            if let Some(AccountState::Metadata(metadata)) =
                self.ledger.account(&Address::metadata(asset)).await?
            {
                metadata_set = metadata.fields == self.settings.token.metadata;
                report.metadata = Some(metadata.fields);
            }

            let target = policy.target(&treasury);
            report.authorities = AuthoritySlot::ALL
                .into_iter()
                .map(|slot| AuthorityStatus {
                    slot,
                    current: account.authority(slot),
                    target,
                })
                .collect();
            locked = minted && report.authorities.iter().all(AuthorityStatus::is_at_target);
        }

        report.steps = [
            (Step::CreateAsset, created),
            (Step::MintSupply, minted),
            (Step::SetMetadata, metadata_set),
            (Step::LockAuthorities, locked),
        ]
        .into_iter()
        .map(|(step, complete)| StepStatus {
            step,
            complete,
            recorded: record.is_complete(step),
        })
        .collect();

        Ok(report)
    }

    /// Forget local progress. The ledger is left untouched and what remains there is
    /// reported.
    pub async fn rollback(&self) -> Result<RollbackReport> {
        let key = &self.settings.deployment;
        let Some(record) = self.store.read(key)? else {
            return Ok(RollbackReport {
                deployment: key.clone(),
                removed: false,
                dry_run: self.settings.dry_run,
                forgotten_steps: Default::default(),
                residue: None,
            });
        };

        let residue = match self.locate_asset(&record).await {
            Ok(Some((asset, account))) => {
                let metadata = matches!(
                    self.ledger.account(&Address::metadata(&asset)).await,
                    Ok(Some(AccountState::Metadata(_)))
                );
                Some(Residue {
                    asset,
                    account,
                    metadata,
                    lookup_error: None,
                })
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "Could not read on-chain residue");
                record.asset_address.map(|asset| Residue {
                    asset,
                    account: None,
                    metadata: false,
                    lookup_error: Some(err.to_string()),
                })
            }
        };

        let removed = if self.settings.dry_run {
            tracing::info!(deployment = %key, "Dry run: checkpoint not deleted");
            false
        } else {
            let removed = self.store.delete(key)?;
            tracing::warn!(
                deployment = %key,
                "Local progress deleted. On-chain state is unchanged"
            );
            removed
        };

        Ok(RollbackReport {
            deployment: key.clone(),
            removed,
            dry_run: self.settings.dry_run,
            forgotten_steps: record.steps_completed,
            residue,
        })
    }
}
