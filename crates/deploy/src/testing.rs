//! In-memory collaborators for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use url::Url;

use crate::{
    checkpoint::{CheckpointStore, DeploymentRecord},
    config::{LedgerSettings, RelaySettings, Settings, TokenSettings},
    error::{DeployError, RelayError, Result},
    identity::Identity,
    ledger::Ledger,
    operation::{Instruction, Operation, StandardOperationBuilder},
    orchestrator::Orchestrator,
    relay::{RelayRequest, RelayResponse, RelaySubmitter, RelayTransport, RetryPolicy, SignedPayload},
    steps::{self, StepContext, StepOutcome},
    types::{
        AccountState, Address, Anchor, AssetAccount, AuthorityPolicy, AuthoritySlot,
        HoldingAccount, MetadataAccount, MetadataFields, Signature, Step, base_units,
    },
};

const HEIGHT: u64 = 1_000;
const VALIDITY_WINDOW: u64 = 150;

pub fn test_settings() -> Settings {
    Settings {
        deployment: "test".to_string(),
        dry_run: false,
        treasury: None,
        token: TokenSettings {
            metadata: MetadataFields {
                name: "Test Token".to_string(),
                symbol: "TEST".to_string(),
                uri: "https://example.com/test.json".to_string(),
            },
            decimals: 6,
            total_supply: 1_000_000,
        },
        relay: RelaySettings {
            endpoint: Url::parse("http://relay.invalid/submit").unwrap(),
            api_key: Some("test-key".to_string()),
            fee_payer: Address::from_bytes([0xfe; 32]),
            retry: RetryPolicy {
                attempts: RetryPolicy::DEFAULT_ATTEMPTS,
                delay: Duration::from_millis(1),
            },
            request_timeout: Duration::from_secs(1),
        },
        ledger: LedgerSettings {
            rpc_url: Url::parse("http://ledger.invalid").unwrap(),
            confirm_poll: Duration::from_millis(1),
            request_timeout: Duration::from_secs(1),
        },
        authority: AuthorityPolicy::Retain,
        identity_path: PathBuf::from("/nonexistent/identity.json"),
        state_dir: PathBuf::from("/nonexistent/state"),
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Address, AccountState>,
    /// Settled operations; `Err` holds the on-ledger failure.
    settled: HashMap<Signature, std::result::Result<(), String>>,
    anchor_requests: usize,
}

/// A ledger held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MockLedger {
    fn with_state<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn anchor_requests(&self) -> usize {
        self.with_state(|s| s.anchor_requests)
    }

    pub fn asset(&self, address: &Address) -> Option<AssetAccount> {
        self.with_state(|s| match s.accounts.get(address) {
            Some(AccountState::Asset(asset)) => Some(asset.clone()),
            _ => None,
        })
    }

    pub fn metadata(&self, asset: &Address) -> Option<MetadataAccount> {
        self.with_state(|s| match s.accounts.get(&Address::metadata(asset)) {
            Some(AccountState::Metadata(metadata)) => Some(metadata.clone()),
            _ => None,
        })
    }

    pub fn balance_of(&self, holding: &Address) -> Option<u64> {
        self.with_state(|s| match s.accounts.get(holding) {
            Some(AccountState::Holding(h)) => Some(h.amount),
            _ => None,
        })
    }

    /// Destroy `amount` from a holding, reducing the asset's supply accordingly.
    pub fn burn_from(&self, holding: &Address, amount: u64) {
        self.with_state(|s| {
            let asset = match s.accounts.get_mut(holding) {
                Some(AccountState::Holding(h)) => {
                    h.amount -= amount;
                    h.asset
                }
                _ => panic!("no holding at {}", holding),
            };
            if let Some(AccountState::Asset(a)) = s.accounts.get_mut(&asset) {
                a.supply -= amount;
            }
        });
    }

    pub fn set_freeze_authority(&self, asset: &Address, authority: Option<Address>) {
        self.with_state(|s| match s.accounts.get_mut(asset) {
            Some(AccountState::Asset(a)) => a.freeze_authority = authority,
            _ => panic!("no asset at {}", asset),
        });
    }

    pub fn put_metadata(&self, asset: &Address, fields: MetadataFields, update_authority: Address) {
        self.with_state(|s| {
            s.accounts.insert(
                Address::metadata(asset),
                AccountState::Metadata(MetadataAccount {
                    asset: *asset,
                    fields,
                    update_authority,
                }),
            );
        });
    }

    /// Apply an operation atomically and record it as settled under `signature`.
    fn settle(&self, signature: Signature, operation: &Operation) {
        self.with_state(|s| {
            let mut accounts = s.accounts.clone();
            let result = operation
                .instructions
                .iter()
                .try_for_each(|instruction| apply(&mut accounts, instruction));
            if result.is_ok() {
                s.accounts = accounts;
            }
            s.settled.insert(signature, result);
        });
    }
}

fn apply(
    accounts: &mut HashMap<Address, AccountState>,
    instruction: &Instruction,
) -> std::result::Result<(), String> {
    fn asset_mut<'a>(
        accounts: &'a mut HashMap<Address, AccountState>,
        asset: &Address,
    ) -> std::result::Result<&'a mut AssetAccount, String> {
        match accounts.get_mut(asset) {
            Some(AccountState::Asset(a)) => Ok(a),
            _ => Err(format!("{} is not an asset", asset)),
        }
    }

    match instruction {
        Instruction::CreateAsset {
            asset,
            decimals,
            mint_authority,
            freeze_authority,
        } => {
            if accounts.contains_key(asset) {
                return Err("account already in use".to_string());
            }
            accounts.insert(
                *asset,
                AccountState::Asset(AssetAccount {
                    decimals: *decimals,
                    supply: 0,
                    mint_authority: Some(*mint_authority),
                    freeze_authority: *freeze_authority,
                }),
            );
        }
        Instruction::CreateHolding {
            holding,
            owner,
            asset,
        } => {
            asset_mut(accounts, asset)?;
            if accounts.contains_key(holding) {
                return Err("holding already exists".to_string());
            }
            accounts.insert(
                *holding,
                AccountState::Holding(HoldingAccount {
                    asset: *asset,
                    owner: *owner,
                    amount: 0,
                }),
            );
        }
        Instruction::Mint {
            asset,
            holding,
            amount,
            authority,
        } => {
            let account = asset_mut(accounts, asset)?;
            if account.mint_authority != Some(*authority) {
                return Err("mint authority mismatch".to_string());
            }
            account.supply = account
                .supply
                .checked_add(*amount)
                .ok_or("supply overflow")?;
            match accounts.get_mut(holding) {
                Some(AccountState::Holding(h)) => h.amount += amount,
                _ => return Err("holding does not exist".to_string()),
            }
        }
        Instruction::CreateMetadata {
            metadata,
            asset,
            fields,
            update_authority,
        } => {
            asset_mut(accounts, asset)?;
            if accounts.contains_key(metadata) {
                return Err("metadata already exists".to_string());
            }
            accounts.insert(
                *metadata,
                AccountState::Metadata(MetadataAccount {
                    asset: *asset,
                    fields: fields.clone(),
                    update_authority: *update_authority,
                }),
            );
        }
        Instruction::UpdateMetadata {
            metadata,
            fields,
            authority,
        } => match accounts.get_mut(metadata) {
            Some(AccountState::Metadata(m)) if m.update_authority == *authority => {
                m.fields = fields.clone();
            }
            Some(AccountState::Metadata(_)) => return Err("update authority mismatch".to_string()),
            _ => return Err("metadata does not exist".to_string()),
        },
        Instruction::SetAuthority {
            asset,
            slot,
            current,
            new,
        } => {
            let account = asset_mut(accounts, asset)?;
            let held = match slot {
                AuthoritySlot::Mint => &mut account.mint_authority,
                AuthoritySlot::Freeze => &mut account.freeze_authority,
            };
            if *held != Some(*current) {
                return Err(format!("{} authority mismatch", slot));
            }
            *held = *new;
        }
    }
    Ok(())
}

impl Ledger for MockLedger {
    async fn latest_anchor(&self) -> Result<Anchor> {
        self.with_state(|s| {
            s.anchor_requests += 1;
            Ok(Anchor {
                reference: format!("anchor-{}", s.anchor_requests),
                last_valid_height: HEIGHT + VALIDITY_WINDOW,
            })
        })
    }

    async fn account(&self, address: &Address) -> Result<Option<AccountState>> {
        Ok(self.with_state(|s| s.accounts.get(address).cloned()))
    }

    async fn balance(&self, holding: &Address) -> Result<Option<u64>> {
        Ok(self.balance_of(holding))
    }

    async fn confirm(&self, signature: &Signature, anchor: &Anchor) -> Result<()> {
        match self.with_state(|s| s.settled.get(signature).cloned()) {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(DeployError::LedgerRejected(reason)),
            None => Err(DeployError::ConfirmationTimeout {
                signature: signature.clone(),
                last_valid_height: anchor.last_valid_height,
            }),
        }
    }
}

/// A fault injected into the next relay call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayFault {
    /// Network failure before the relay answers.
    Transport,
    /// Relay answers `success = false`.
    Reject,
    /// Relay simulation says the ledger would reject the operation.
    LedgerReject,
    /// Relay accepts but the operation never lands.
    Drop,
}

/// A relay that decodes payloads and settles them on a [`MockLedger`].
#[derive(Debug)]
pub struct MockRelay {
    ledger: MockLedger,
    faults: Mutex<VecDeque<RelayFault>>,
    calls: AtomicUsize,
    credentials: Mutex<HashSet<Option<String>>>,
}

impl MockRelay {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            ledger,
            faults: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            credentials: Mutex::new(HashSet::new()),
        }
    }

    pub fn push_faults(&self, faults: impl IntoIterator<Item = RelayFault>) {
        self.faults.lock().unwrap().extend(faults);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_credential(&self, credential: Option<&str>) -> bool {
        self.credentials
            .lock()
            .unwrap()
            .contains(&credential.map(str::to_string))
    }
}

impl RelayTransport for MockRelay {
    async fn send(
        &self,
        _endpoint: &Url,
        credential: Option<&str>,
        request: &RelayRequest,
    ) -> std::result::Result<RelayResponse, RelayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.map(str::to_string));
        let fault = self.faults.lock().unwrap().pop_front();

        match fault {
            Some(RelayFault::Transport) => {
                return Err(RelayError::Transport("connection reset".to_string()));
            }
            Some(RelayFault::Reject) => {
                return Ok(RelayResponse {
                    success: false,
                    tx_signature: None,
                    error: Some("relay busy".to_string()),
                });
            }
            Some(RelayFault::LedgerReject) => {
                return Err(RelayError::LedgerRejected("simulation failed".to_string()));
            }
            Some(RelayFault::Drop) | None => {}
        }

        let payload = SignedPayload::decode(&request.signed_payload_base64)
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        let operation = &payload.message.operation;
        if let Some(missing) = operation
            .signers
            .iter()
            .find(|signer| !payload.signatures.iter().any(|s| s.signer == **signer))
        {
            return Ok(RelayResponse {
                success: false,
                tx_signature: None,
                error: Some(format!("missing signature for {}", missing)),
            });
        }

        let signature = Signature::new(format!("mock-signature-{}", call));
        if fault != Some(RelayFault::Drop) {
            self.ledger.settle(signature.clone(), operation);
        }
        Ok(RelayResponse {
            success: true,
            tx_signature: Some(signature.to_string()),
            error: None,
        })
    }
}

/// A local HTTP server answering each request with the next canned `(status, body)`.
///
/// Every connection carries one request and is closed after the answer. The JSON body
/// of each request is recorded.
pub struct HttpStub {
    url: Url,
    requests: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl HttpStub {
    pub async fn serve(responses: impl IntoIterator<Item = (u16, Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to listen");
        let addr = listener.local_addr().expect("bound address");
        let mut responses: VecDeque<(u16, Value)> = responses.into_iter().collect();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let body = read_request(&mut stream).await;
                seen.lock()
                    .unwrap()
                    .push(serde_json::from_slice(&body).unwrap_or(Value::Null));
                let Some((status, answer)) = responses.pop_front() else {
                    break;
                };
                let answer = answer.to_string();
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    answer.len(),
                    answer
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            url: Url::parse(&format!("http://{}/", addr)).expect("valid url"),
            requests,
            handle,
        }
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// JSON bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Read one request and return its body.
async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut body_range = None;
    loop {
        if let Some((start, len)) = body_range {
            if buf.len() >= start + len {
                return buf[start..start + len].to_vec();
            }
        }
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return Vec::new(),
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if body_range.is_none() {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                body_range = Some((end + 4, len));
            }
        }
    }
}

/// Checkpoint store held in memory, with injectable write failures.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<String, DeploymentRecord>>,
    writes: AtomicUsize,
    /// Writes beyond this count fail.
    write_budget: Mutex<Option<usize>>,
}

impl MemoryCheckpointStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Let `n` more writes succeed, then fail every write after.
    pub fn fail_writes_after(&self, n: usize) {
        *self.write_budget.lock().unwrap() = Some(n);
    }

    pub fn allow_writes(&self) {
        *self.write_budget.lock().unwrap() = None;
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self, key: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    fn write(&self, record: &DeploymentRecord) -> Result<()> {
        let path = PathBuf::from(format!("memory://{}", record.key));
        {
            let mut budget = self.write_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(DeployError::storage(path, "simulated crash")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        record
            .validate()
            .map_err(|reason| DeployError::storage(&path, reason))?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(key).is_some())
    }
}

/// A deployer identity wired to an in-memory ledger, relay and store.
pub struct Harness {
    pub settings: Settings,
    pub identity: Identity,
    pub ledger: MockLedger,
    pub relay: MockRelay,
    pub store: MemoryCheckpointStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_policy(policy: AuthorityPolicy) -> Self {
        let mut settings = test_settings();
        settings.authority = policy;
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Settings) -> Self {
        let ledger = MockLedger::default();
        Self {
            settings,
            identity: Identity::generate(),
            relay: MockRelay::new(ledger.clone()),
            ledger,
            store: MemoryCheckpointStore::default(),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator<'_, MockLedger, &MockRelay> {
        Orchestrator::new(
            &self.settings,
            self.identity.clone(),
            self.ledger.clone(),
            &self.relay,
            &self.store,
        )
    }

    /// Run a single step directly, outside the orchestrator.
    pub async fn run_step(&self, step: Step) -> Result<StepOutcome> {
        let submitter = RelaySubmitter::new(&self.relay, &self.settings.relay, self.settings.dry_run);
        let record = self
            .store
            .read(&self.settings.deployment)?
            .unwrap_or_else(|| DeploymentRecord::new(&self.settings.deployment));
        let mut ctx = StepContext {
            settings: &self.settings,
            identity: &self.identity,
            ledger: &self.ledger,
            submitter: &submitter,
            builder: &StandardOperationBuilder,
            store: &self.store,
            record,
            simulated: Default::default(),
        };
        steps::execute(step, &mut ctx).await
    }

    pub fn record(&self) -> Option<DeploymentRecord> {
        self.store.read(&self.settings.deployment).unwrap()
    }

    pub fn asset_address(&self) -> Address {
        self.record()
            .and_then(|r| r.asset_address)
            .expect("asset has been created")
    }

    pub fn treasury(&self) -> Address {
        self.settings.treasury.unwrap_or(self.identity.address())
    }

    pub fn holding_address(&self) -> Address {
        Address::holding(&self.treasury(), &self.asset_address())
    }

    pub fn target_supply(&self) -> u64 {
        base_units(self.settings.token.total_supply, self.settings.token.decimals).unwrap()
    }
}
