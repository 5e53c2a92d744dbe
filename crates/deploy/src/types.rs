//! Core value types shared by every stage of a deployment.

use std::{fmt, str::FromStr};

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Error returned when parsing an [`Address`] from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address '{input}': {reason}")]
pub struct ParseAddressError {
    input: String,
    reason: &'static str,
}

/// A 32-byte ledger address, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 32]);

impl Address {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a deterministic address from a domain tag and a list of parent addresses.
    pub fn derive(tag: &str, parents: &[&Address]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        for parent in parents {
            hasher.update(parent.0);
        }
        Self(hasher.finalize().into())
    }

    /// The holding account of `owner` for `asset`.
    pub fn holding(owner: &Address, asset: &Address) -> Self {
        Self::derive("relaymint/holding", &[owner, asset])
    }

    /// The metadata account attached to `asset`.
    pub fn metadata(asset: &Address) -> Self {
        Self::derive("relaymint/metadata", &[asset])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseAddressError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_part).map_err(|_| err("not valid hex"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| err("expected exactly 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = ParseAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// A settled (or sentinel) operation signature as reported by the relay.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref,
)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Returned by dry runs in place of a real settlement signature.
    pub const DRY_RUN: &'static str = "DRY_RUN_SIGNATURE";

    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn dry_run() -> Self {
        Self(Self::DRY_RUN.to_string())
    }

    pub fn is_dry_run(&self) -> bool {
        self.0 == Self::DRY_RUN
    }
}

/// The four deployment stages, in their causal order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CreateAsset,
    MintSupply,
    SetMetadata,
    LockAuthorities,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::CreateAsset,
        Step::MintSupply,
        Step::SetMetadata,
        Step::LockAuthorities,
    ];

    /// Human-readable label for menus and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Step::CreateAsset => "Create asset",
            Step::MintSupply => "Mint supply",
            Step::SetMetadata => "Set metadata",
            Step::LockAuthorities => "Lock authorities",
        }
    }
}

/// The permission slots attached to an asset.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AuthoritySlot {
    Mint,
    Freeze,
}

impl AuthoritySlot {
    pub const ALL: [AuthoritySlot; 2] = [AuthoritySlot::Mint, AuthoritySlot::Freeze];
}

/// Where the authority slots end up once Lock-Authorities has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityPolicy {
    /// Disable both authorities. Irreversible.
    Revoke,
    /// Hand both authorities to a governance address.
    Delegate(Address),
    /// Keep both authorities at the treasury address.
    Retain,
}

impl AuthorityPolicy {
    /// The authority value both slots must hold once locked.
    pub fn target(&self, treasury: &Address) -> Option<Address> {
        match self {
            AuthorityPolicy::Revoke => None,
            AuthorityPolicy::Delegate(address) => Some(*address),
            AuthorityPolicy::Retain => Some(*treasury),
        }
    }

    pub fn is_irreversible(&self) -> bool {
        matches!(self, AuthorityPolicy::Revoke)
    }
}

impl fmt::Display for AuthorityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityPolicy::Revoke => write!(f, "none (revoke, irreversible)"),
            AuthorityPolicy::Delegate(address) => write!(f, "delegate to {}", address),
            AuthorityPolicy::Retain => write!(f, "self (retain at treasury)"),
        }
    }
}

/// A single authority slot with its current and desired holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityChange {
    pub slot: AuthoritySlot,
    pub current: Option<Address>,
    pub target: Option<Address>,
}

impl AuthorityChange {
    pub fn is_at_target(&self) -> bool {
        self.current == self.target
    }
}

/// A recency reference the ledger requires for an operation to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub reference: String,
    pub last_valid_height: u64,
}

impl Anchor {
    /// Placeholder used by dry runs, which never touch the network.
    pub fn placeholder() -> Self {
        Self {
            reference: "0".repeat(64),
            last_valid_height: 0,
        }
    }
}

/// On-ledger state of a fungible asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAccount {
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Address>,
    pub freeze_authority: Option<Address>,
}

impl AssetAccount {
    pub fn authority(&self, slot: AuthoritySlot) -> Option<Address> {
        match slot {
            AuthoritySlot::Mint => self.mint_authority,
            AuthoritySlot::Freeze => self.freeze_authority,
        }
    }
}

/// Balance of one owner for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingAccount {
    pub asset: Address,
    pub owner: Address,
    pub amount: u64,
}

/// Descriptive fields of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFields {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

/// Metadata record attached to an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataAccount {
    pub asset: Address,
    pub fields: MetadataFields,
    pub update_authority: Address,
}

/// Decoded state of a ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AccountState {
    Asset(AssetAccount),
    Holding(HoldingAccount),
    Metadata(MetadataAccount),
}

/// Total supply in base units: `whole_units * 10^decimals`.
///
/// Returns `None` when the product does not fit in a `u64`.
pub fn base_units(whole_units: u64, decimals: u8) -> Option<u64> {
    10u64
        .checked_pow(u32::from(decimals))
        .and_then(|scale| scale.checked_mul(whole_units))
}
