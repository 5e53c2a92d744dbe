//! Status and rollback reports.

use std::{collections::BTreeSet, fmt};

use crate::types::{Address, AssetAccount, AuthorityPolicy, AuthoritySlot, MetadataFields, Step};

/// Live-reconciled completion of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub step: Step,
    /// Whether the step's effect is visible on the ledger.
    pub complete: bool,
    /// Whether the local checkpoint records the step.
    pub recorded: bool,
}

impl StepStatus {
    /// The checkpoint disagrees with the ledger.
    pub fn is_stale(&self) -> bool {
        self.complete != self.recorded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyStatus {
    pub decimals: u8,
    /// Total supply of the asset in base units.
    pub supply: u64,
    /// Configured supply in base units, if it fits in 64 bits at the asset's precision.
    pub target: Option<u64>,
    pub treasury_balance: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityStatus {
    pub slot: AuthoritySlot,
    pub current: Option<Address>,
    pub target: Option<Address>,
}

impl AuthorityStatus {
    /// A revoked authority can never be restored.
    pub fn is_revoked(&self) -> bool {
        self.current.is_none()
    }

    pub fn is_at_target(&self) -> bool {
        self.current == self.target
    }
}

/// Deployment status as observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub deployment: String,
    pub identity: Address,
    pub treasury: Address,
    pub policy: AuthorityPolicy,
    pub asset: Option<Address>,
    pub steps: Vec<StepStatus>,
    pub supply: Option<SupplyStatus>,
    pub metadata: Option<MetadataFields>,
    pub authorities: Vec<AuthorityStatus>,
}

impl StatusReport {
    pub fn completed(&self) -> usize {
        self.steps.iter().filter(|s| s.complete).count()
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.complete)
    }

    /// The summary lines above the step list.
    pub fn header(&self) -> StatusHeader<'_> {
        StatusHeader(self)
    }
}

/// Deployment name, progress, identity, treasury and asset of a [`StatusReport`].
pub struct StatusHeader<'a>(&'a StatusReport);

impl fmt::Display for StatusHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(
            f,
            "Deployment '{}': {}/{} steps complete",
            report.deployment,
            report.completed(),
            report.steps.len()
        )?;
        writeln!(f, "  identity: {}", report.identity)?;
        writeln!(f, "  treasury: {}", report.treasury)?;
        match &report.asset {
            Some(asset) => writeln!(f, "  asset:    {}", asset),
            None => writeln!(f, "  asset:    (not created)"),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())?;
        writeln!(f)?;

        writeln!(f, "=== Steps ===")?;
        for status in &self.steps {
            write!(f, "  {} {}", status_icon(status.complete), status.step.label())?;
            if status.is_stale() {
                write!(f, " (checkpoint out of date)")?;
            }
            writeln!(f)?;
        }

        if let Some(supply) = &self.supply {
            writeln!(f)?;
            writeln!(f, "=== Supply ===")?;
            write!(f, "  total={} decimals={}", supply.supply, supply.decimals)?;
            if let Some(target) = supply.target {
                write!(f, " target={}", target)?;
            }
            if let Some(balance) = supply.treasury_balance {
                write!(f, " treasury={}", balance)?;
            }
            writeln!(f)?;
        }

        if let Some(metadata) = &self.metadata {
            writeln!(f)?;
            writeln!(f, "=== Metadata ===")?;
            writeln!(f, "  {} ({}) {}", metadata.name, metadata.symbol, metadata.uri)?;
        }

        if !self.authorities.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Authorities (policy: {}) ===", self.policy)?;
            for authority in &self.authorities {
                writeln!(f, "{}", authority)?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for AuthorityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {} {}: ", status_icon(self.is_at_target()), self.slot)?;
        match self.current {
            Some(holder) => write!(f, "{}", holder)?,
            None => write!(f, "revoked [permanent]")?,
        }
        if !self.is_at_target() {
            match self.target {
                Some(target) => write!(f, " -> {}", target)?,
                None => write!(f, " -> revoke")?,
            }
        }
        Ok(())
    }
}

/// What a rollback removed locally and what it left on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub deployment: String,
    /// Whether a checkpoint existed and was deleted.
    pub removed: bool,
    /// Nothing was deleted because the run is a dry run.
    pub dry_run: bool,
    pub forgotten_steps: BTreeSet<Step>,
    pub residue: Option<Residue>,
}

/// On-ledger state that survives a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residue {
    pub asset: Address,
    /// Live asset state, or `None` if it could not be read.
    pub account: Option<AssetAccount>,
    pub metadata: bool,
    pub lookup_error: Option<String>,
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dry_run, self.removed) {
            (true, _) => writeln!(
                f,
                "Dry run: the checkpoint for '{}' was left in place",
                self.deployment
            )?,
            (false, true) => writeln!(
                f,
                "Local progress for '{}' has been forgotten",
                self.deployment
            )?,
            (false, false) => writeln!(f, "No local progress recorded for '{}'", self.deployment)?,
        }

        if !self.forgotten_steps.is_empty() {
            let steps: Vec<_> = self.forgotten_steps.iter().map(|s| s.to_string()).collect();
            writeln!(f, "  checkpointed steps: {}", steps.join(", "))?;
        }

        let Some(residue) = &self.residue else {
            return Ok(());
        };

        writeln!(f)?;
        writeln!(f, "Rollback does not change the ledger. Still on-chain:")?;
        writeln!(f, "  asset: {}", residue.asset)?;
        if let Some(error) = &residue.lookup_error {
            writeln!(f, "  (ledger state unavailable: {})", error)?;
        }
        if let Some(account) = &residue.account {
            writeln!(f, "  supply: {} (decimals {})", account.supply, account.decimals)?;
            for slot in AuthoritySlot::ALL {
                match account.authority(slot) {
                    Some(holder) => writeln!(f, "  {} authority: {}", slot, holder)?,
                    None => writeln!(f, "  {} authority: revoked [permanent]", slot)?,
                }
            }
        }
        if residue.metadata {
            writeln!(f, "  metadata record: present")?;
        }
        Ok(())
    }
}

fn status_icon(ok: bool) -> &'static str {
    if ok { "[ok]" } else { "[--]" }
}
