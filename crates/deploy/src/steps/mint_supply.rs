use crate::{
    error::{DeployError, Result},
    ledger::Ledger,
    operation::MintRequest,
    relay::RelayTransport,
    types::{Address, Step},
};

use super::{StepContext, StepExecutor, StepOutcome};

/// Mints the configured total supply into the treasury's holding account.
///
/// The target is computed at the asset's on-ledger precision. Only the shortfall
/// against the current supply is minted, and a missing holding account is created in
/// the same operation.
pub struct MintSupply;

impl StepExecutor for MintSupply {
    const STEP: Step = Step::MintSupply;

    async fn execute<L: Ledger, T: RelayTransport>(
        ctx: &mut StepContext<'_, L, T>,
    ) -> Result<StepOutcome> {
        if ctx.simulated.contains(&Self::STEP) {
            return Ok(StepOutcome::AlreadyComplete);
        }

        let (asset, account) = ctx.asset(Self::STEP).await?;
        let target = ctx.target_supply(Self::STEP, account.decimals)?;
        let treasury = ctx.treasury();
        let holding = Address::holding(&treasury, &asset);
        let balance = ctx.ledger.balance(&holding).await?;

        if let Some(balance) = balance {
            if balance > target {
                return Err(DeployError::precondition(
                    Self::STEP,
                    format!("treasury holds {} base units, more than the target {}", balance, target),
                ));
            }
        }

        if balance == Some(target) || account.supply >= target {
            if !ctx.record.is_complete(Self::STEP) {
                tracing::warn!(
                    supply = account.supply,
                    target,
                    "Supply already finalized on the ledger, recording it"
                );
            }
            ctx.complete(Self::STEP, None)?;
            return Ok(StepOutcome::AlreadyComplete);
        }

        let deployer = ctx.identity.address();
        match account.mint_authority {
            Some(authority) if authority == deployer => {}
            Some(authority) => {
                return Err(DeployError::precondition(
                    Self::STEP,
                    format!("mint authority is held by {}, not the deployer {}", authority, deployer),
                ));
            }
            None => {
                return Err(DeployError::precondition(
                    Self::STEP,
                    "mint authority has been revoked; supply can no longer change",
                ));
            }
        }

        let amount = target - account.supply;
        let request = MintRequest {
            asset,
            owner: treasury,
            holding,
            amount,
            authority: deployer,
            create_holding: balance.is_none(),
        };
        tracing::info!(
            amount,
            target,
            holding = %holding,
            create_holding = request.create_holding,
            "Minting supply..."
        );

        let operation = ctx.builder.mint_supply(&request);
        let signature = ctx.submit(&operation, &[]).await?;
        ctx.complete(Self::STEP, Some(signature.clone()))?;

        Ok(StepOutcome::Applied(signature))
    }
}
