use crate::{
    checkpoint::PendingAsset,
    error::{DeployError, Result},
    identity::Identity,
    ledger::Ledger,
    relay::RelayTransport,
    types::{AccountState, Address, Step},
};

use super::{StepContext, StepExecutor, StepOutcome};

/// Creates the asset account under a freshly generated asset key.
///
/// The key is checkpointed as pending before submission. If the process dies after
/// the operation settles but before completion is recorded, the next run finds the
/// pending asset on the ledger and adopts it instead of creating a second one.
pub struct CreateAsset;

impl StepExecutor for CreateAsset {
    const STEP: Step = Step::CreateAsset;

    async fn execute<L: Ledger, T: RelayTransport>(
        ctx: &mut StepContext<'_, L, T>,
    ) -> Result<StepOutcome> {
        if let Some(asset) = ctx.record.asset_address {
            if ctx.simulated.contains(&Self::STEP) || is_asset(ctx, &asset).await? {
                if !ctx.record.is_complete(Self::STEP) {
                    ctx.record.set_asset(asset, None);
                    ctx.persist()?;
                }
                return Ok(StepOutcome::AlreadyComplete);
            }
            return Err(DeployError::precondition(
                Self::STEP,
                format!(
                    "recorded asset {} does not exist on the ledger; roll back to start a new deployment",
                    asset
                ),
            ));
        }

        let asset_key = match ctx.record.pending_asset.clone() {
            Some(pending) => {
                if is_asset(ctx, &pending.address).await? {
                    tracing::warn!(
                        asset = %pending.address,
                        "Asset from an interrupted run exists on the ledger, recovering it"
                    );
                    ctx.record.set_asset(pending.address, None);
                    ctx.persist()?;
                    return Ok(StepOutcome::AlreadyComplete);
                }
                tracing::info!(asset = %pending.address, "Retrying creation with the pending asset key");
                pending.identity()?
            }
            None => {
                let key = Identity::generate();
                ctx.record.pending_asset = Some(PendingAsset::from_identity(&key));
                ctx.persist()?;
                key
            }
        };

        let asset = asset_key.address();
        let deployer = ctx.identity.address();
        let operation = ctx.builder.create_asset(
            &asset,
            ctx.settings.token.decimals,
            &deployer,
            Some(&deployer),
        );
        let signature = ctx.submit(&operation, &[&asset_key]).await?;

        if signature.is_dry_run() {
            ctx.record.set_asset(asset, None);
            ctx.simulated.insert(Self::STEP);
        } else {
            ctx.record.set_asset(asset, Some(signature.clone()));
            ctx.persist()?;
        }

        tracing::info!(
            asset = %asset,
            decimals = ctx.settings.token.decimals,
            "Asset created"
        );
        Ok(StepOutcome::Applied(signature))
    }
}

async fn is_asset<L: Ledger, T: RelayTransport>(
    ctx: &StepContext<'_, L, T>,
    address: &Address,
) -> Result<bool> {
    match ctx.ledger.account(address).await? {
        Some(AccountState::Asset(_)) => Ok(true),
        None => Ok(false),
        Some(_) => Err(DeployError::precondition(
            Step::CreateAsset,
            format!("account {} exists but is not an asset", address),
        )),
    }
}
