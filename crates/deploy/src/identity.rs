//! Local signing identity.
//!
//! The identity signs every operation as its nominal initiator. It never pays fees:
//! the relay's fee payer adds the remaining authorization.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use k256::ecdsa::{SigningKey, signature::Signer};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{DeployError, Result},
    fs::FsHandler,
    types::Address,
};

/// A secp256k1 keypair and the ledger address derived from it.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    address: Address,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        loop {
            // Out-of-range scalars are astronomically rare; draw again if one shows up.
            let secret: [u8; 32] = rng.random();
            if let Ok(signing_key) = SigningKey::from_bytes(&secret.into()) {
                return Self::from_signing_key(signing_key);
            }
        }
    }

    /// Rebuild an identity from a hex-encoded 32-byte secret key (with or without 0x prefix).
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let secret_hex = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let secret: [u8; 32] = hex::decode(secret_hex)
            .map_err(|e| DeployError::Internal(format!("secret key is not valid hex: {}", e)))?
            .try_into()
            .map_err(|_| DeployError::Internal("secret key must be exactly 32 bytes".to_string()))?;

        let signing_key = SigningKey::from_bytes(&secret.into())
            .map_err(|e| DeployError::Internal(format!("invalid secp256k1 secret key: {}", e)))?;

        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = signing_key.verifying_key().to_encoded_point(true);
        let address = Address::from_bytes(Sha256::digest(public_key.as_bytes()).into());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign `message`, returning the hex-encoded compact ECDSA signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: k256::ecdsa::Signature = self.signing_key.sign(message);
        hex::encode(signature.to_bytes())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// On-disk form of an identity.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    address: Address,
    secret_key: String,
}

/// Loads the deployer identity, creating it on first use.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted identity, or create and persist a fresh one if none exists.
    ///
    /// Repeated calls return the same identity.
    pub fn load_or_create(&self) -> Result<Identity> {
        if let Some(content) = FsHandler::read_optional(&self.path)? {
            let file: IdentityFile = serde_json::from_str(&content)
                .map_err(|e| DeployError::storage(&self.path, format!("malformed identity file: {}", e)))?;
            let identity = Identity::from_secret_hex(&file.secret_key)
                .map_err(|e| DeployError::storage(&self.path, e))?;

            if identity.address() != file.address {
                return Err(DeployError::storage(
                    &self.path,
                    format!(
                        "identity file lists address {} but its key derives {}",
                        file.address,
                        identity.address()
                    ),
                ));
            }

            tracing::debug!(path = %self.path.display(), address = %identity.address(), "Identity loaded");
            return Ok(identity);
        }

        let identity = Identity::generate();
        let file = IdentityFile {
            address: identity.address(),
            secret_key: identity.secret_hex(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| DeployError::Internal(format!("failed to encode identity: {}", e)))?;
        FsHandler::write_atomic(&self.path, content.as_bytes(), true)?;

        tracing::info!(path = %self.path.display(), address = %identity.address(), "Created new deployer identity");
        Ok(identity)
    }
}
