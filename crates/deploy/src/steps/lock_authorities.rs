use crate::{
    error::{DeployError, Result},
    ledger::Ledger,
    relay::RelayTransport,
    types::{AuthorityChange, AuthoritySlot, Step},
};

use super::{StepContext, StepExecutor, StepOutcome};

/// Moves the mint and freeze authorities to the configured policy target.
///
/// Requires the supply to be finalized on the ledger: after a revoke no further
/// minting is possible. Revocation is one-way, so a slot that is already revoked can
/// never be moved again.
pub struct LockAuthorities;

impl StepExecutor for LockAuthorities {
    const STEP: Step = Step::LockAuthorities;

    async fn execute<L: Ledger, T: RelayTransport>(
        ctx: &mut StepContext<'_, L, T>,
    ) -> Result<StepOutcome> {
        if ctx.simulated.contains(&Self::STEP) {
            return Ok(StepOutcome::AlreadyComplete);
        }

        let (asset, account) = ctx.asset(Self::STEP).await?;
        let target_supply = ctx.target_supply(Self::STEP, account.decimals)?;
        if account.supply < target_supply {
            return Err(DeployError::precondition(
                Self::STEP,
                format!(
                    "supply is not finalized ({} of {} base units), run {} first",
                    account.supply,
                    target_supply,
                    Step::MintSupply
                ),
            ));
        }

        let policy = ctx.settings.authority;
        let target = policy.target(&ctx.treasury());
        let pending: Vec<AuthorityChange> = AuthoritySlot::ALL
            .into_iter()
            .map(|slot| AuthorityChange {
                slot,
                current: account.authority(slot),
                target,
            })
            .filter(|change| !change.is_at_target())
            .collect();

        if pending.is_empty() {
            ctx.complete(Self::STEP, None)?;
            return Ok(StepOutcome::AlreadyComplete);
        }

        let deployer = ctx.identity.address();
        for change in &pending {
            match change.current {
                None => {
                    return Err(DeployError::precondition(
                        Self::STEP,
                        format!("{} authority was revoked and cannot be reassigned", change.slot),
                    ));
                }
                Some(holder) if holder != deployer => {
                    return Err(DeployError::precondition(
                        Self::STEP,
                        format!("{} authority is held by {}, not the deployer", change.slot, holder),
                    ));
                }
                Some(_) => {}
            }
        }

        if policy.is_irreversible() {
            tracing::warn!(
                slots = pending.len(),
                "Revoking authorities. This cannot be undone"
            );
        }
        tracing::info!(policy = %policy, slots = pending.len(), "Locking authorities...");

        let operation = ctx.builder.set_authorities(&asset, &pending, &deployer);
        let signature = ctx.submit(&operation, &[]).await?;
        ctx.complete(Self::STEP, Some(signature.clone()))?;

        Ok(StepOutcome::Applied(signature))
    }
}
