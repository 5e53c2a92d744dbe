//! Fingerprint of the settings a deployment was run with.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    config::Settings,
    error::{DeployError, Result},
    types::{Address, AuthorityPolicy, MetadataFields},
};

/// Settings that shape what ends up on the ledger.
///
/// Relay, RPC and retry settings are excluded: changing them between runs does not
/// change the deployed asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentFingerprint {
    pub metadata: MetadataFields,
    pub decimals: u8,
    pub total_supply: u64,
    pub treasury: Option<Address>,
    pub authority: String,
}

impl DeploymentFingerprint {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            metadata: settings.token.metadata.clone(),
            decimals: settings.token.decimals,
            total_supply: settings.token.total_supply,
            treasury: settings.treasury,
            authority: match settings.authority {
                AuthorityPolicy::Revoke => "none".to_string(),
                AuthorityPolicy::Delegate(address) => format!("delegate:{}", address),
                AuthorityPolicy::Retain => "self".to_string(),
            },
        }
    }

    /// Hex-encoded SHA-256 of the JSON form. Field order is fixed by the struct.
    pub fn compute_hash(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| {
            DeployError::Internal(format!("failed to encode deployment fingerprint: {}", e))
        })?;
        Ok(hex::encode(Sha256::digest(json)))
    }
}
