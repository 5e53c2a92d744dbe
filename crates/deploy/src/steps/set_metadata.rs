use crate::{
    error::{DeployError, Result},
    ledger::Ledger,
    operation::MetadataRequest,
    relay::RelayTransport,
    types::{AccountState, Address, Step},
};

use super::{StepContext, StepExecutor, StepOutcome};

/// Attaches the configured name, symbol and URI to the asset.
///
/// Whether to create or update is decided from the ledger, since metadata may have
/// been written out-of-band.
pub struct SetMetadata;

impl StepExecutor for SetMetadata {
    const STEP: Step = Step::SetMetadata;

    async fn execute<L: Ledger, T: RelayTransport>(
        ctx: &mut StepContext<'_, L, T>,
    ) -> Result<StepOutcome> {
        if ctx.simulated.contains(&Self::STEP) {
            return Ok(StepOutcome::AlreadyComplete);
        }

        let (asset, _) = ctx.asset(Self::STEP).await?;
        let fields = ctx.settings.token.metadata.clone();
        let deployer = ctx.identity.address();
        let metadata_address = Address::metadata(&asset);

        let request = match ctx.ledger.account(&metadata_address).await? {
            None => MetadataRequest::Create {
                asset,
                fields,
                update_authority: deployer,
            },
            Some(AccountState::Metadata(existing)) if existing.fields == fields => {
                ctx.complete(Self::STEP, None)?;
                return Ok(StepOutcome::AlreadyComplete);
            }
            Some(AccountState::Metadata(existing)) if existing.update_authority != deployer => {
                return Err(DeployError::precondition(
                    Self::STEP,
                    format!(
                        "metadata differs but its update authority is {}, not the deployer",
                        existing.update_authority
                    ),
                ));
            }
            Some(AccountState::Metadata(existing)) => {
                tracing::info!(
                    current_name = %existing.fields.name,
                    current_symbol = %existing.fields.symbol,
                    "Existing metadata differs, updating it"
                );
                MetadataRequest::Update {
                    asset,
                    fields,
                    authority: deployer,
                }
            }
            Some(_) => {
                return Err(DeployError::precondition(
                    Self::STEP,
                    format!("account {} is not a metadata record", metadata_address),
                ));
            }
        };

        let operation = ctx.builder.metadata(&request);
        let signature = ctx.submit(&operation, &[]).await?;
        ctx.complete(Self::STEP, Some(signature.clone()))?;

        tracing::info!(
            name = %ctx.settings.token.metadata.name,
            symbol = %ctx.settings.token.metadata.symbol,
            "Metadata set"
        );
        Ok(StepOutcome::Applied(signature))
    }
}
