//! Durable deployment checkpoints.
//!
//! A [`DeploymentRecord`] tracks which steps have completed for one deployment. It is
//! a resumption hint, never the source of truth: every step reconciles it against live
//! ledger state before trusting it.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DeployError, Result},
    fs::FsHandler,
    identity::Identity,
    types::{Address, Signature, Step},
};

/// Asset key generated for a Create-Asset submission that has not been confirmed yet.
///
/// Persisted before the submission so that an operation which settles just before a
/// crash can still be attributed to this deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAsset {
    pub address: Address,
    pub secret_key: String,
}

impl PendingAsset {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            address: identity.address(),
            secret_key: identity.secret_hex(),
        }
    }

    pub fn identity(&self) -> Result<Identity> {
        Identity::from_secret_hex(&self.secret_key)
    }
}

impl std::fmt::Debug for PendingAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAsset")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Checkpoint of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_asset: Option<PendingAsset>,
    #[serde(default)]
    pub steps_completed: BTreeSet<Step>,
    #[serde(default)]
    pub signatures: BTreeMap<Step, Signature>,
    /// Fingerprint of the settings the deployment was last run with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Unix seconds of the last write.
    #[serde(default)]
    pub updated_at: i64,
}

impl DeploymentRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            asset_address: None,
            pending_asset: None,
            steps_completed: BTreeSet::new(),
            signatures: BTreeMap::new(),
            config_hash: None,
            updated_at: 0,
        }
    }

    pub fn is_complete(&self, step: Step) -> bool {
        self.steps_completed.contains(&step)
    }

    /// Mark `step` complete, keeping the signature of the operation that applied it.
    pub fn mark(&mut self, step: Step, signature: Option<Signature>) {
        self.steps_completed.insert(step);
        if let Some(signature) = signature {
            self.signatures.insert(step, signature);
        }
    }

    /// Record the asset address and mark creation complete.
    pub fn set_asset(&mut self, asset: Address, signature: Option<Signature>) {
        self.asset_address = Some(asset);
        self.pending_asset = None;
        self.mark(Step::CreateAsset, signature);
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Later steps may only be complete once the asset exists and is recorded.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.is_complete(Step::CreateAsset) && self.asset_address.is_none() {
            return Err(format!("{} is marked without an asset address", Step::CreateAsset));
        }
        if let Some(step) = self
            .steps_completed
            .iter()
            .find(|step| **step != Step::CreateAsset)
        {
            if !self.is_complete(Step::CreateAsset) {
                return Err(format!("{} is marked before {}", step, Step::CreateAsset));
            }
        }
        if let Some(step) = self
            .signatures
            .keys()
            .find(|step| !self.steps_completed.contains(step))
        {
            return Err(format!("signature recorded for incomplete step {}", step));
        }
        Ok(())
    }
}

/// Persistence for [`DeploymentRecord`]s.
pub trait CheckpointStore: Send + Sync {
    /// The record for `key`, or `None` if nothing has been recorded.
    fn read(&self, key: &str) -> Result<Option<DeploymentRecord>>;

    /// Replace the stored record. A crash leaves either the old or the new record.
    fn write(&self, record: &DeploymentRecord) -> Result<()>;

    /// Forget the record for `key`. Returns whether one existed.
    fn delete(&self, key: &str) -> Result<bool>;
}

/// One pretty-printed JSON file per deployment under `<state_dir>/deployments/`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("deployments"),
        }
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self, key: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(key);
        let Some(content) = FsHandler::read_optional(&path)? else {
            return Ok(None);
        };

        let record: DeploymentRecord = serde_json::from_str(&content)
            .map_err(|e| DeployError::storage(&path, format!("corrupt checkpoint: {}", e)))?;
        if record.key != key {
            return Err(DeployError::storage(
                &path,
                format!("checkpoint belongs to deployment '{}'", record.key),
            ));
        }

        tracing::debug!(
            path = %path.display(),
            steps = record.steps_completed.len(),
            "Checkpoint loaded"
        );
        Ok(Some(record))
    }

    fn write(&self, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(&record.key);
        record
            .validate()
            .map_err(|reason| DeployError::storage(&path, format!("refusing to write: {}", reason)))?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| DeployError::storage(&path, e))?;
        // The record may carry a pending asset key.
        FsHandler::write_atomic(&path, content.as_bytes(), true)?;

        tracing::debug!(path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.record_path(key);
        // A leftover staging file from an interrupted write is local progress too.
        FsHandler::remove_optional(&FsHandler::staging_path(&path))?;
        FsHandler::remove_optional(&path)
    }
}
