//! Read and confirmation access to the ledger.
//!
//! The deployment core never writes to the ledger directly: every mutation goes
//! through the relay. This module only reads state and waits for settlement.

use std::future::Future;

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    config::LedgerSettings,
    error::{DeployError, Result},
    types::{AccountState, Address, Anchor, Signature},
};

/// Ledger operations the orchestrator depends on.
pub trait Ledger: Send + Sync {
    /// A fresh recency anchor for a new operation.
    fn latest_anchor(&self) -> impl Future<Output = Result<Anchor>> + Send;

    /// Decoded account state, or `None` if the account does not exist.
    fn account(&self, address: &Address) -> impl Future<Output = Result<Option<AccountState>>> + Send;

    /// Balance of a holding account, or `None` if it does not exist.
    fn balance(&self, holding: &Address) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Wait until `signature` settles within `anchor`'s validity window.
    ///
    /// Fails with [`DeployError::LedgerRejected`] if the operation settled with an
    /// error, or [`DeployError::ConfirmationTimeout`] once the anchor has expired.
    fn confirm(
        &self,
        signature: &Signature,
        anchor: &Anchor,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Settlement status of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub finalized: bool,
    #[serde(default)]
    pub err: Option<String>,
}

/// JSON-RPC ledger client.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: Url,
    settings: LedgerSettings,
}

impl RpcLedger {
    pub fn new(settings: &LedgerSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| DeployError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: settings.rpc_url.clone(),
            settings: settings.clone(),
        })
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let unavailable = |reason: String| DeployError::LedgerUnavailable {
            method: method.to_string(),
            reason,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable response: {}", e)))?;

        if let Some(error) = body.get("error") {
            return Err(unavailable(format!(
                "RPC error: {}",
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
            )));
        }

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| unavailable("no result in response".to_string()))?;

        serde_json::from_value(result).map_err(|e| unavailable(format!("unexpected result: {}", e)))
    }
}

impl Ledger for RpcLedger {
    async fn latest_anchor(&self) -> Result<Anchor> {
        self.call("getLatestAnchor", vec![]).await
    }

    async fn account(&self, address: &Address) -> Result<Option<AccountState>> {
        self.call("getAccount", vec![serde_json::json!(address)]).await
    }

    async fn balance(&self, holding: &Address) -> Result<Option<u64>> {
        self.call("getBalance", vec![serde_json::json!(holding)]).await
    }

    async fn confirm(&self, signature: &Signature, anchor: &Anchor) -> Result<()> {
        loop {
            let status: Option<SignatureStatus> = self
                .call("getSignatureStatus", vec![serde_json::json!(signature)])
                .await?;

            match status {
                Some(SignatureStatus { err: Some(err), .. }) => {
                    return Err(DeployError::LedgerRejected(err));
                }
                Some(SignatureStatus {
                    finalized: true, ..
                }) => {
                    tracing::debug!(signature = %signature, "Operation finalized");
                    return Ok(());
                }
                _ => {}
            }

            let height: u64 = self.call("getHeight", vec![]).await?;
            if height > anchor.last_valid_height {
                return Err(DeployError::ConfirmationTimeout {
                    signature: signature.clone(),
                    last_valid_height: anchor.last_valid_height,
                });
            }

            tracing::trace!(
                signature = %signature,
                height,
                last_valid_height = anchor.last_valid_height,
                "Waiting for confirmation..."
            );
            tokio::time::sleep(self.settings.confirm_poll).await;
        }
    }
}
