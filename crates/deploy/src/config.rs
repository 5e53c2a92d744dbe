//! Deployment configuration.
//!
//! [`DeployConfig`] is the raw, serializable shape loaded from `relaymint.toml` and
//! `RELAYMINT_*` environment variables. [`DeployConfig::resolve`] validates it into an
//! immutable [`Settings`] value before any network activity takes place.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{DeployError, Result},
    relay::RetryPolicy,
    types::{Address, AuthorityPolicy, MetadataFields},
};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "relaymint.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "RELAYMINT_";

/// Largest precision accepted for an asset.
pub const MAX_DECIMALS: u8 = 18;

/// Default directory holding the identity and the deployment records.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaymint")
}

/// Token parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub decimals: u8,
    /// Total supply in whole units.
    pub total_supply: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            symbol: String::new(),
            uri: String::new(),
            decimals: 9,
            total_supply: 1_000_000_000,
        }
    }
}

/// Fee-paying relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub endpoint: String,
    /// Optional bearer token sent with every submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Address of the relay's fee payer.
    pub fee_payer: String,
    /// Total submission attempts, including the first.
    pub attempts: usize,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            fee_payer: String::new(),
            attempts: RetryPolicy::DEFAULT_ATTEMPTS,
            retry_delay_ms: RetryPolicy::DEFAULT_DELAY.as_millis() as u64,
            request_timeout_secs: 30,
        }
    }
}

/// Ledger RPC settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub confirm_poll_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            confirm_poll_ms: 500,
            request_timeout_secs: 10,
        }
    }
}

/// Authority transfer mode as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum AuthorityMode {
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    Revoke,
    #[serde(rename = "delegate")]
    #[strum(serialize = "delegate")]
    Delegate,
    #[default]
    #[serde(rename = "self")]
    #[strum(serialize = "self")]
    Retain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub mode: AuthorityMode,
    /// Governance address, required when `mode = "delegate"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub identity: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            identity: data_dir.join("identity.json"),
            state_dir: data_dir.join("state"),
        }
    }
}

/// Raw deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Name of this deployment; keys the local checkpoint.
    pub deployment: String,
    /// Build and sign operations without submitting anything.
    pub dry_run: bool,
    /// Owner of the minted supply. Defaults to the deployer identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treasury: Option<String>,
    pub token: TokenConfig,
    pub relay: RelayConfig,
    pub ledger: LedgerConfig,
    pub authority: AuthorityConfig,
    pub paths: PathsConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            deployment: "default".to_string(),
            dry_run: false,
            treasury: None,
            token: TokenConfig::default(),
            relay: RelayConfig::default(),
            ledger: LedgerConfig::default(),
            authority: AuthorityConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl DeployConfig {
    /// Load configuration: defaults, then the TOML file (if any), then environment overrides.
    ///
    /// Nested keys are overridden with a double underscore, e.g. `RELAYMINT_RELAY__API_KEY`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(DeployConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(DeployError::ConfigInvalid(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            let path = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            figment = figment.merge(Toml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployError::ConfigInvalid(e.to_string()))?;

        tracing::debug!(deployment = %config.deployment, "Configuration loaded");
        Ok(config)
    }

    /// Render the configuration as TOML with secrets redacted.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        if redacted.relay.api_key.is_some() {
            redacted.relay.api_key = Some("<redacted>".to_string());
        }
        toml::to_string_pretty(&redacted)
            .map_err(|e| DeployError::Internal(format!("failed to render configuration: {}", e)))
    }

    /// Validate every setting and produce the immutable [`Settings`] for a run.
    pub fn resolve(&self) -> Result<Settings> {
        let invalid = |msg: String| DeployError::ConfigInvalid(msg);

        if self.deployment.is_empty()
            || !self
                .deployment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(format!(
                "deployment name '{}' must be non-empty and contain only letters, digits, '-' or '_'",
                self.deployment
            )));
        }

        let token = &self.token;
        if token.name.trim().is_empty() {
            return Err(invalid("token.name is required".to_string()));
        }
        if token.symbol.trim().is_empty() {
            return Err(invalid("token.symbol is required".to_string()));
        }
        if token.decimals > MAX_DECIMALS {
            return Err(invalid(format!(
                "token.decimals must be at most {}, got {}",
                MAX_DECIMALS, token.decimals
            )));
        }
        if token.total_supply == 0 {
            return Err(invalid("token.total_supply must be greater than zero".to_string()));
        }
        if crate::types::base_units(token.total_supply, token.decimals).is_none() {
            return Err(invalid(format!(
                "token.total_supply {} with {} decimals overflows the ledger's 64-bit amounts",
                token.total_supply, token.decimals
            )));
        }

        let endpoint = parse_url("relay.endpoint", &self.relay.endpoint)?;
        let rpc_url = parse_url("ledger.rpc_url", &self.ledger.rpc_url)?;
        let fee_payer = parse_address("relay.fee_payer", &self.relay.fee_payer)?;
        if self.relay.attempts == 0 {
            return Err(invalid("relay.attempts must be at least 1".to_string()));
        }
        if self.relay.request_timeout_secs == 0 {
            return Err(invalid("relay.request_timeout_secs must be at least 1".to_string()));
        }
        if self.ledger.request_timeout_secs == 0 {
            return Err(invalid("ledger.request_timeout_secs must be at least 1".to_string()));
        }

        let treasury = self
            .treasury
            .as_deref()
            .map(|t| parse_address("treasury", t))
            .transpose()?;

        let authority = match (self.authority.mode, self.authority.delegate.as_deref()) {
            (AuthorityMode::Delegate, Some(delegate)) => {
                AuthorityPolicy::Delegate(parse_address("authority.delegate", delegate)?)
            }
            (AuthorityMode::Delegate, None) => {
                return Err(invalid(
                    "authority.delegate is required when authority.mode = \"delegate\"".to_string(),
                ));
            }
            (mode, Some(_)) => {
                return Err(invalid(format!(
                    "authority.delegate is only valid with mode \"delegate\", not \"{}\"",
                    mode
                )));
            }
            (AuthorityMode::Revoke, None) => AuthorityPolicy::Revoke,
            (AuthorityMode::Retain, None) => AuthorityPolicy::Retain,
        };

        Ok(Settings {
            deployment: self.deployment.clone(),
            dry_run: self.dry_run,
            treasury,
            token: TokenSettings {
                metadata: MetadataFields {
                    name: token.name.trim().to_string(),
                    symbol: token.symbol.trim().to_string(),
                    uri: token.uri.trim().to_string(),
                },
                decimals: token.decimals,
                total_supply: token.total_supply,
            },
            relay: RelaySettings {
                endpoint,
                api_key: self.relay.api_key.clone().filter(|k| !k.is_empty()),
                fee_payer,
                retry: RetryPolicy {
                    attempts: self.relay.attempts,
                    delay: Duration::from_millis(self.relay.retry_delay_ms),
                },
                request_timeout: Duration::from_secs(self.relay.request_timeout_secs),
            },
            ledger: LedgerSettings {
                rpc_url,
                confirm_poll: Duration::from_millis(self.ledger.confirm_poll_ms.max(1)),
                request_timeout: Duration::from_secs(self.ledger.request_timeout_secs),
            },
            authority,
            identity_path: self.paths.identity.clone(),
            state_dir: self.paths.state_dir.clone(),
        })
    }

    /// A commented starter configuration file.
    pub fn starter_toml() -> &'static str {
        r#"# relaymint configuration
# Every key can be overridden from the environment, e.g. RELAYMINT_RELAY__API_KEY.

# Name of this deployment. Progress is checkpointed under this name.
deployment = "default"

# Build and sign every operation without submitting anything.
dry_run = false

# Owner of the minted supply. Defaults to the deployer identity.
# treasury = "<64 hex chars>"

[token]
name = "Example Token"
symbol = "EXMPL"
uri = "https://example.com/token.json"
decimals = 9
total_supply = 1000000000

[relay]
endpoint = "https://relay.example.com/submit"
# api_key = "..."
fee_payer = "0000000000000000000000000000000000000000000000000000000000000000"
attempts = 3
retry_delay_ms = 1000

[ledger]
rpc_url = "http://127.0.0.1:8899"

[authority]
# none     - revoke mint and freeze authorities (irreversible)
# delegate - hand them to `delegate`
# self     - keep them at the treasury address
mode = "self"
# delegate = "<64 hex chars>"
"#
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    if value.trim().is_empty() {
        return Err(DeployError::ConfigInvalid(format!("{} is required", key)));
    }
    Url::parse(value.trim())
        .map_err(|e| DeployError::ConfigInvalid(format!("{} is not a valid URL: {}", key, e)))
}

fn parse_address(key: &str, value: &str) -> Result<Address> {
    if value.trim().is_empty() {
        return Err(DeployError::ConfigInvalid(format!("{} is required", key)));
    }
    value
        .parse()
        .map_err(|e| DeployError::ConfigInvalid(format!("{}: {}", key, e)))
}

/// Validated token parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub metadata: MetadataFields,
    /// Precision requested at creation time.
    pub decimals: u8,
    /// Total supply in whole units.
    pub total_supply: u64,
}

/// Validated relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub fee_payer: Address,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

/// Validated ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub rpc_url: Url,
    pub confirm_poll: Duration,
    pub request_timeout: Duration,
}

/// Immutable settings for one run, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub deployment: String,
    pub dry_run: bool,
    pub treasury: Option<Address>,
    pub token: TokenSettings,
    pub relay: RelaySettings,
    pub ledger: LedgerSettings,
    pub authority: AuthorityPolicy,
    pub identity_path: PathBuf,
    pub state_dir: PathBuf,
}
