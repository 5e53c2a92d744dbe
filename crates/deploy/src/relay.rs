//! Fee-delegated submission through an external relay.
//!
//! An operation is signed by the local identity (and any extra signers such as a
//! freshly generated asset key), left without fee-payer authorization, and handed to
//! the relay, which pays fees and broadcasts it. The submitter then waits for the
//! ledger to confirm settlement.

use std::{future::Future, time::Duration};

use backon::{ConstantBuilder, Retryable};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::RelaySettings,
    error::{DeployError, RelayError, Result},
    identity::Identity,
    ledger::Ledger,
    operation::Operation,
    types::{Address, Anchor, Signature},
};

/// Bounded constant-delay retry for relay hand-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: usize,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: usize = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.attempts.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Body sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub signed_payload_base64: String,
}

/// Body returned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayResponse {
    fn into_signature(self) -> Result<Signature, RelayError> {
        match self {
            RelayResponse {
                success: true,
                tx_signature: Some(signature),
                ..
            } => Ok(Signature::new(signature)),
            RelayResponse { success: true, .. } => Err(RelayError::Rejected(
                "relay reported success without a signature".to_string(),
            )),
            RelayResponse { error, .. } => Err(RelayError::Rejected(
                error.unwrap_or_else(|| "no reason given".to_string()),
            )),
        }
    }
}

/// The request/response channel to a relay.
pub trait RelayTransport: Send + Sync {
    fn send(
        &self,
        endpoint: &Url,
        credential: Option<&str>,
        request: &RelayRequest,
    ) -> impl Future<Output = Result<RelayResponse, RelayError>> + Send;
}

impl<T: RelayTransport> RelayTransport for &T {
    fn send(
        &self,
        endpoint: &Url,
        credential: Option<&str>,
        request: &RelayRequest,
    ) -> impl Future<Output = Result<RelayResponse, RelayError>> + Send {
        (**self).send(endpoint, credential, request)
    }
}

/// HTTP relay transport.
///
/// Network failures, `408`, `429` and `5xx` answers are transport failures. A `422`
/// answer with `success = false` means the relay simulated the operation and the
/// ledger would deterministically reject it.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeployError::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl RelayTransport for HttpRelay {
    async fn send(
        &self,
        endpoint: &Url,
        credential: Option<&str>,
        request: &RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        let mut builder = self.client.post(endpoint.clone()).json(request);
        if let Some(token) = credential {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(RelayError::Transport(format!("relay answered HTTP {}", status)));
        }

        let body: RelayResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Transport(format!("unreadable relay response: {}", e)))?;

        if status == StatusCode::UNPROCESSABLE_ENTITY && !body.success {
            return Err(RelayError::LedgerRejected(
                body.error.unwrap_or_else(|| "simulation failed".to_string()),
            ));
        }

        Ok(body)
    }
}

/// The part of a payload covered by every signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMessage {
    pub operation: Operation,
    pub anchor: Anchor,
    pub fee_payer: Address,
}

impl PayloadMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DeployError::Internal(format!("failed to encode operation: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSignature {
    pub signer: Address,
    pub signature: String,
}

/// A partially signed operation: every required signer except the fee payer has signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub message: PayloadMessage,
    pub signatures: Vec<PayloadSignature>,
}

impl SignedPayload {
    /// Sign `message` with each identity listed in the operation's required signers.
    pub fn sign(message: PayloadMessage, signers: &[&Identity]) -> Result<Self> {
        let bytes = message.to_bytes()?;

        let mut signatures = Vec::with_capacity(message.operation.signers.len());
        for required in &message.operation.signers {
            let identity = signers
                .iter()
                .find(|identity| identity.address() == *required)
                .ok_or_else(|| {
                    DeployError::Internal(format!("no key available for required signer {}", required))
                })?;
            signatures.push(PayloadSignature {
                signer: *required,
                signature: identity.sign(&bytes),
            });
        }

        Ok(Self {
            message,
            signatures,
        })
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| DeployError::Internal(format!("failed to encode payload: {}", e)))?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = STANDARD
            .decode(encoded)
            .map_err(|e| DeployError::Internal(format!("payload is not base64: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| DeployError::Internal(format!("payload is not a signed operation: {}", e)))
    }
}

/// Submits operations through the relay and waits for settlement.
#[derive(Debug)]
pub struct RelaySubmitter<T> {
    transport: T,
    endpoint: Url,
    credential: Option<String>,
    fee_payer: Address,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<T: RelayTransport> RelaySubmitter<T> {
    pub fn new(transport: T, settings: &RelaySettings, dry_run: bool) -> Self {
        Self {
            transport,
            endpoint: settings.endpoint.clone(),
            credential: settings.api_key.clone(),
            fee_payer: settings.fee_payer,
            retry: settings.retry,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// A dry-run view of this submitter sharing its transport.
    pub fn preview(&self) -> RelaySubmitter<&T> {
        RelaySubmitter {
            transport: &self.transport,
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            fee_payer: self.fee_payer,
            retry: self.retry,
            dry_run: true,
        }
    }

    /// Sign, dispatch and confirm `operation`, returning its settled signature.
    ///
    /// In dry-run mode nothing leaves the process: the payload is built with a
    /// placeholder anchor, logged, and [`Signature::DRY_RUN`] is returned.
    pub async fn submit<L: Ledger>(
        &self,
        ledger: &L,
        operation: &Operation,
        signers: &[&Identity],
    ) -> Result<Signature> {
        let anchor = if self.dry_run {
            Anchor::placeholder()
        } else {
            ledger.latest_anchor().await?
        };

        let payload = SignedPayload::sign(
            PayloadMessage {
                operation: operation.clone(),
                anchor: anchor.clone(),
                fee_payer: self.fee_payer,
            },
            signers,
        )?;
        let encoded = payload.encode()?;

        if self.dry_run {
            tracing::info!(
                instructions = operation.instructions.len(),
                payload_bytes = encoded.len(),
                payload_prefix = %&encoded[..encoded.len().min(32)],
                "Dry run: operation built and signed, not submitted"
            );
            return Ok(Signature::dry_run());
        }

        let signature = self.dispatch(encoded).await?;
        tracing::info!(signature = %signature, "Relay accepted operation, awaiting confirmation...");

        ledger.confirm(&signature, &anchor).await?;
        tracing::info!(signature = %signature, "Operation confirmed");

        Ok(signature)
    }

    /// Hand the payload to the relay, retrying transport failures and relay rejections.
    async fn dispatch(&self, encoded: String) -> Result<Signature> {
        let request = RelayRequest {
            signed_payload_base64: encoded,
        };

        let attempt = || async {
            self.transport
                .send(&self.endpoint, self.credential.as_deref(), &request)
                .await
                .and_then(RelayResponse::into_signature)
        };

        attempt
            .retry(self.retry.backoff())
            .when(RelayError::is_retryable)
            .notify(|err: &RelayError, delay: Duration| {
                tracing::warn!(error = %err, ?delay, "Relay submission failed, retrying...");
            })
            .await
            .map_err(|err| match err {
                RelayError::LedgerRejected(reason) => DeployError::LedgerRejected(reason),
                last => DeployError::RelayExhausted {
                    attempts: self.retry.attempts,
                    last,
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DeployError,
        testing::{HttpStub, MockLedger, MockRelay, RelayFault, test_settings},
    };
    use serde_json::json;

    fn create_operation(identity: &Identity, asset: &Identity) -> Operation {
        use crate::operation::{OperationBuilder, StandardOperationBuilder};
        StandardOperationBuilder.create_asset(&asset.address(), 6, &identity.address(), None)
    }

    #[test]
    fn test_payload_roundtrip_and_signers() {
        let identity = Identity::generate();
        let asset = Identity::generate();
        let message = PayloadMessage {
            operation: create_operation(&identity, &asset),
            anchor: Anchor::placeholder(),
            fee_payer: Address::from_bytes([5u8; 32]),
        };

        let payload = SignedPayload::sign(message, &[&identity, &asset]).unwrap();
        assert_eq!(payload.signatures.len(), 2);
        assert!(payload.signatures.iter().all(|s| s.signer != Address::from_bytes([5u8; 32])));

        let decoded = SignedPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_missing_signer_is_an_error() {
        let identity = Identity::generate();
        let asset = Identity::generate();
        let message = PayloadMessage {
            operation: create_operation(&identity, &asset),
            anchor: Anchor::placeholder(),
            fee_payer: Address::from_bytes([5u8; 32]),
        };
        assert!(SignedPayload::sign(message, &[&identity]).is_err());
    }

    #[test]
    fn test_relay_response_interpretation() {
        let ok = RelayResponse {
            success: true,
            tx_signature: Some("abc".to_string()),
            error: None,
        };
        assert_eq!(ok.into_signature().unwrap(), Signature::new("abc"));

        let rejected = RelayResponse {
            success: false,
            tx_signature: None,
            error: Some("quota exceeded".to_string()),
        };
        assert_eq!(
            rejected.into_signature().unwrap_err(),
            RelayError::Rejected("quota exceeded".to_string())
        );
    }

    #[test]
    fn test_relay_request_wire_shape() {
        let json = serde_json::to_value(RelayRequest {
            signed_payload_base64: "AAAA".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "signedPayloadBase64": "AAAA" }));

        let response: RelayResponse =
            serde_json::from_str(r#"{"success": true, "txSignature": "sig"}"#).unwrap();
        assert_eq!(response.tx_signature.as_deref(), Some("sig"));
    }

    #[tokio::test]
    async fn test_submit_settles_through_relay() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let signature = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap();

        assert!(!signature.is_dry_run());
        assert_eq!(relay.calls(), 1);
        assert!(ledger.asset(&asset.address()).is_some());
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_after_three_attempts() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        relay.push_faults([RelayFault::Transport, RelayFault::Transport, RelayFault::Transport]);
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let err = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::RelayExhausted {
                attempts: 3,
                last: RelayError::Transport(_)
            }
        ));
        assert_eq!(relay.calls(), 3);
        assert!(ledger.asset(&asset.address()).is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        relay.push_faults([RelayFault::Transport, RelayFault::Reject]);
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .expect("third attempt succeeds");

        assert_eq!(relay.calls(), 3);
    }

    #[tokio::test]
    async fn test_ledger_rejection_is_not_retried() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        relay.push_faults([RelayFault::LedgerReject]);
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let err = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::LedgerRejected(_)));
        assert_eq!(relay.calls(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_expiry_is_terminal() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        relay.push_faults([RelayFault::Drop]);
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let err = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ConfirmationTimeout { .. }));
        assert_eq!(relay.calls(), 1);
        assert!(err.is_retryable());
    }

    async fn send_once(stub: &HttpStub) -> Result<RelayResponse, RelayError> {
        let relay = HttpRelay::new(Duration::from_secs(5)).unwrap();
        relay
            .send(
                &stub.url(),
                Some("test-key"),
                &RelayRequest {
                    signed_payload_base64: "AAAA".to_string(),
                },
            )
            .await
    }

    #[tokio::test]
    async fn test_http_relay_accepts_signature() {
        let stub = HttpStub::serve([(200, json!({ "success": true, "txSignature": "abc" }))]).await;

        let response = send_once(&stub).await.unwrap();
        assert_eq!(response.into_signature().unwrap(), Signature::new("abc"));
        assert_eq!(stub.requests(), vec![json!({ "signedPayloadBase64": "AAAA" })]);
    }

    #[tokio::test]
    async fn test_http_relay_overload_and_server_errors_are_transport_failures() {
        for status in [500, 503, 408, 429] {
            let stub =
                HttpStub::serve([(status, json!({ "success": false, "error": "busy" }))]).await;
            let err = send_once(&stub).await.unwrap_err();
            assert!(matches!(err, RelayError::Transport(_)), "HTTP {}: {:?}", status, err);
            assert!(err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_http_relay_unprocessable_is_ledger_rejection() {
        let stub =
            HttpStub::serve([(422, json!({ "success": false, "error": "sim failed" }))]).await;

        let err = send_once(&stub).await.unwrap_err();
        assert_eq!(err, RelayError::LedgerRejected("sim failed".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_relay_other_refusal_is_retryable_rejection() {
        let stub = HttpStub::serve([(400, json!({ "success": false, "error": "bad fee" }))]).await;

        let response = send_once(&stub).await.unwrap();
        let err = response.into_signature().unwrap_err();
        assert_eq!(err, RelayError::Rejected("bad fee".to_string()));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_submitter_stops_on_unprocessable_answer() {
        let stub = HttpStub::serve([
            (422, json!({ "success": false, "error": "sim failed" })),
            (200, json!({ "success": true, "txSignature": "abc" })),
        ])
        .await;
        let ledger = MockLedger::default();
        let mut settings = test_settings();
        settings.relay.endpoint = stub.url();
        let relay = HttpRelay::new(settings.relay.request_timeout).unwrap();
        let submitter = RelaySubmitter::new(relay, &settings.relay, false);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let err = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::LedgerRejected(ref reason) if reason == "sim failed"));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_the_network() {
        let ledger = MockLedger::default();
        let relay = MockRelay::new(ledger.clone());
        let settings = test_settings();
        let submitter = RelaySubmitter::new(&relay, &settings.relay, true);
        let identity = Identity::generate();
        let asset = Identity::generate();

        let signature = submitter
            .submit(&ledger, &create_operation(&identity, &asset), &[&identity, &asset])
            .await
            .unwrap();

        assert!(signature.is_dry_run());
        assert_eq!(relay.calls(), 0);
        assert_eq!(ledger.anchor_requests(), 0);
        assert!(ledger.asset(&asset.address()).is_none());
    }
}
