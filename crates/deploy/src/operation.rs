//! Unsigned ledger operations and the builder that produces them.

use serde::{Deserialize, Serialize};

use crate::types::{Address, AuthorityChange, AuthoritySlot, MetadataFields};

/// A single ledger instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Instruction {
    #[serde(rename_all = "camelCase")]
    CreateAsset {
        asset: Address,
        decimals: u8,
        mint_authority: Address,
        freeze_authority: Option<Address>,
    },
    #[serde(rename_all = "camelCase")]
    CreateHolding {
        holding: Address,
        owner: Address,
        asset: Address,
    },
    #[serde(rename_all = "camelCase")]
    Mint {
        asset: Address,
        holding: Address,
        amount: u64,
        authority: Address,
    },
    #[serde(rename_all = "camelCase")]
    CreateMetadata {
        metadata: Address,
        asset: Address,
        fields: MetadataFields,
        update_authority: Address,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMetadata {
        metadata: Address,
        fields: MetadataFields,
        authority: Address,
    },
    #[serde(rename_all = "camelCase")]
    SetAuthority {
        asset: Address,
        slot: AuthoritySlot,
        current: Address,
        new: Option<Address>,
    },
}

/// An ordered batch of instructions that settles atomically, plus the addresses that must sign it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Address>,
}

impl Operation {
    pub fn new(instructions: Vec<Instruction>, signers: Vec<Address>) -> Self {
        let mut unique = Vec::with_capacity(signers.len());
        for signer in signers {
            if !unique.contains(&signer) {
                unique.push(signer);
            }
        }
        Self {
            instructions,
            signers: unique,
        }
    }
}

/// Parameters for the Mint-Supply operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    pub asset: Address,
    pub owner: Address,
    pub holding: Address,
    pub amount: u64,
    pub authority: Address,
    /// Prepend the creation of the holding account.
    pub create_holding: bool,
}

/// Create-or-update shape of a metadata operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRequest {
    Create {
        asset: Address,
        fields: MetadataFields,
        update_authority: Address,
    },
    Update {
        asset: Address,
        fields: MetadataFields,
        authority: Address,
    },
}

/// Builds the unsigned operations for each deployment step.
pub trait OperationBuilder: Send + Sync {
    fn create_asset(
        &self,
        asset: &Address,
        decimals: u8,
        mint_authority: &Address,
        freeze_authority: Option<&Address>,
    ) -> Operation;

    fn mint_supply(&self, request: &MintRequest) -> Operation;

    fn metadata(&self, request: &MetadataRequest) -> Operation;

    /// One operation moving every listed slot from `authority` to its target.
    fn set_authorities(
        &self,
        asset: &Address,
        changes: &[AuthorityChange],
        authority: &Address,
    ) -> Operation;
}

/// Default builder for the relaymint ledger programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardOperationBuilder;

impl OperationBuilder for StandardOperationBuilder {
    fn create_asset(
        &self,
        asset: &Address,
        decimals: u8,
        mint_authority: &Address,
        freeze_authority: Option<&Address>,
    ) -> Operation {
        Operation::new(
            vec![Instruction::CreateAsset {
                asset: *asset,
                decimals,
                mint_authority: *mint_authority,
                freeze_authority: freeze_authority.copied(),
            }],
            // The new asset account must sign its own creation.
            vec![*mint_authority, *asset],
        )
    }

    fn mint_supply(&self, request: &MintRequest) -> Operation {
        let mut instructions = Vec::with_capacity(2);
        if request.create_holding {
            instructions.push(Instruction::CreateHolding {
                holding: request.holding,
                owner: request.owner,
                asset: request.asset,
            });
        }
        instructions.push(Instruction::Mint {
            asset: request.asset,
            holding: request.holding,
            amount: request.amount,
            authority: request.authority,
        });
        Operation::new(instructions, vec![request.authority])
    }

    fn metadata(&self, request: &MetadataRequest) -> Operation {
        match request {
            MetadataRequest::Create {
                asset,
                fields,
                update_authority,
            } => Operation::new(
                vec![Instruction::CreateMetadata {
                    metadata: Address::metadata(asset),
                    asset: *asset,
                    fields: fields.clone(),
                    update_authority: *update_authority,
                }],
                vec![*update_authority],
            ),
            MetadataRequest::Update {
                asset,
                fields,
                authority,
            } => Operation::new(
                vec![Instruction::UpdateMetadata {
                    metadata: Address::metadata(asset),
                    fields: fields.clone(),
                    authority: *authority,
                }],
                vec![*authority],
            ),
        }
    }

    fn set_authorities(
        &self,
        asset: &Address,
        changes: &[AuthorityChange],
        authority: &Address,
    ) -> Operation {
        let instructions = changes
            .iter()
            .map(|change| Instruction::SetAuthority {
                asset: *asset,
                slot: change.slot,
                current: *authority,
                new: change.target,
            })
            .collect();
        Operation::new(instructions, vec![*authority])
    }
}
