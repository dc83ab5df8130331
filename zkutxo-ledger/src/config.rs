//! Engine configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zkutxo_attestor::SignatureScheme;
use zkutxo_common::{Address, UtxoError};

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILIATION POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// How reconciliation treats a local SPENT that the ledger reports unspent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Route such records through `recover` instead of only reporting them.
    #[serde(default)]
    pub allow_unspend: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Give up waiting for a receipt after this long.
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,

    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Re-sign and resubmit this many times after a nonce conflict.
    #[serde(default = "default_max_nonce_retries")]
    pub max_nonce_retries: u32,

    /// Base delay between retries; doubles each attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub signature_scheme: SignatureScheme,

    #[serde(default)]
    pub reconcile: ReconcilePolicy,

    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Chain the JSON-RPC ledger must be on; checked against the node and
    /// stamped into every transaction.
    #[serde(default)]
    pub chain_id: Option<u64>,

    /// Cross-check canonical hashes against the contract's `hash*` views.
    #[serde(default)]
    pub hash_view: bool,

    #[serde(default)]
    pub ledger_address: Option<Address>,

    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Address the ledger trusts; defaults to the attestor key's own address.
    #[serde(default)]
    pub trusted_signer: Option<Address>,
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_receipt_poll_interval_ms() -> u64 {
    3000
}

fn default_max_nonce_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            max_nonce_retries: default_max_nonce_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            signature_scheme: SignatureScheme::default(),
            reconcile: ReconcilePolicy::default(),
            store_path: None,
            chain_id: None,
            hash_view: false,
            ledger_address: None,
            rpc_url: None,
            trusted_signer: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `ZKUTXO_*` environment variables.
    pub fn from_env() -> Result<Self, UtxoError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, UtxoError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let number = |name: &str, default: u64| -> Result<u64, UtxoError> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| UtxoError::InvalidInput(format!("{name} must be an integer"))),
                None => Ok(default),
            }
        };
        let address = |name: &str| -> Result<Option<Address>, UtxoError> {
            lookup(name).map(|raw| raw.parse()).transpose()
        };

        let signature_scheme = match lookup("ZKUTXO_SIGNATURE_SCHEME").as_deref() {
            None | Some("personal_message") => SignatureScheme::PersonalMessage,
            Some("raw_digest") => SignatureScheme::RawDigest,
            Some(other) => {
                return Err(UtxoError::InvalidInput(format!(
                    "unknown ZKUTXO_SIGNATURE_SCHEME '{other}'"
                )))
            }
        };

        let max_nonce_retries = u32::try_from(number(
            "ZKUTXO_MAX_NONCE_RETRIES",
            defaults.max_nonce_retries as u64,
        )?)
        .map_err(|_| UtxoError::InvalidInput("ZKUTXO_MAX_NONCE_RETRIES out of range".into()))?;

        let flag = |name: &str| matches!(lookup(name).as_deref(), Some("1" | "true" | "yes"));

        Ok(Self {
            receipt_timeout_secs: number("ZKUTXO_RECEIPT_TIMEOUT_SECS", defaults.receipt_timeout_secs)?,
            receipt_poll_interval_ms: number(
                "ZKUTXO_RECEIPT_POLL_INTERVAL_MS",
                defaults.receipt_poll_interval_ms,
            )?,
            max_nonce_retries,
            retry_delay_ms: number("ZKUTXO_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            signature_scheme,
            reconcile: ReconcilePolicy {
                allow_unspend: flag("ZKUTXO_RECONCILE_ALLOW_UNSPEND"),
            },
            store_path: lookup("ZKUTXO_STORE_PATH").map(PathBuf::from),
            chain_id: lookup("ZKUTXO_CHAIN_ID")
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map_err(|_| UtxoError::InvalidInput("ZKUTXO_CHAIN_ID must be an integer".into()))
                })
                .transpose()?,
            hash_view: flag("ZKUTXO_HASH_VIEW"),
            ledger_address: address("ZKUTXO_LEDGER_ADDRESS")?,
            rpc_url: lookup("ZKUTXO_RPC_URL"),
            trusted_signer: address("ZKUTXO_TRUSTED_SIGNER")?,
        })
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn receipt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.receipt_timeout_secs = secs;
        self
    }

    pub fn receipt_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.receipt_poll_interval_ms = ms;
        self
    }

    pub fn max_nonce_retries(mut self, retries: u32) -> Self {
        self.config.max_nonce_retries = retries;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn signature_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.config.signature_scheme = scheme;
        self
    }

    pub fn allow_unspend(mut self, allow: bool) -> Self {
        self.config.reconcile.allow_unspend = allow;
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = Some(url.into());
        self
    }

    pub fn ledger_address(mut self, address: Address) -> Self {
        self.config.ledger_address = Some(address);
        self
    }

    pub fn trusted_signer(mut self, address: Address) -> Self {
        self.config.trusted_signer = Some(address);
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = Some(chain_id);
        self
    }

    pub fn hash_view(mut self, enabled: bool) -> Self {
        self.config.hash_view = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
