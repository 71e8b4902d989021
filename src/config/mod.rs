//! Endpoint and session configuration.
//!
//! Sources are layered: defaults, then a JSON file, then environment and flags (the CLI
//! folds the last two into one [`FileConfig`] via clap). [`SessionSettings::resolve`]
//! validates the merged result once, up front, without touching the network.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::wire::Address;

pub const PLACEHOLDER_PROGRAM_ID: &str = "your_program_id_here";
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOPUP_AMOUNT: u64 = 100_000;
pub const DEFAULT_PAYLOAD: &[u8] = b"gaspass";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Cluster {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
    Localnet,
    /// In-process cluster from [`crate::ledger`].
    Simulated,
    Custom(String),
}

impl Cluster {
    pub fn url(&self) -> &str {
        match self {
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
            Cluster::Localnet => "http://127.0.0.1:8899",
            Cluster::Simulated => "simulated://local",
            Cluster::Custom(url) => url,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Cluster::Simulated)
    }
}

impl FromStr for Cluster {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(Cluster::Custom(value.trim_end_matches('/').to_string()));
        }
        match value.to_ascii_lowercase().as_str() {
            "devnet" => Ok(Cluster::Devnet),
            "testnet" => Ok(Cluster::Testnet),
            "mainnet-beta" | "mainnet" => Ok(Cluster::MainnetBeta),
            "localnet" | "localhost" => Ok(Cluster::Localnet),
            "simulated" => Ok(Cluster::Simulated),
            _ => Err(ConfigError::UnknownCluster(value.to_string())),
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cluster::Devnet => f.write_str("devnet"),
            Cluster::Testnet => f.write_str("testnet"),
            Cluster::MainnetBeta => f.write_str("mainnet-beta"),
            Cluster::Localnet => f.write_str("localnet"),
            Cluster::Simulated => f.write_str("simulated"),
            Cluster::Custom(url) => f.write_str(url),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl FromStr for Commitment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(ConfigError::UnknownCommitment(other.to_string())),
        }
    }
}

/// Target cluster and program. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    cluster: Cluster,
    program_id: Address,
    commitment: Commitment,
    preflight_commitment: Commitment,
}

impl EndpointConfig {
    pub fn new(cluster: Cluster, program_id: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            cluster,
            program_id: parse_program_id(program_id)?,
            commitment: Commitment::Confirmed,
            preflight_commitment: Commitment::Processed,
        })
    }

    pub fn with_commitment(mut self, commitment: Commitment, preflight: Commitment) -> Self {
        self.commitment = commitment;
        self.preflight_commitment = preflight;
        self
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn url(&self) -> &str {
        self.cluster.url()
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    pub fn preflight_commitment(&self) -> Commitment {
        self.preflight_commitment
    }
}

pub fn parse_program_id(value: &str) -> Result<Address, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingProgramId);
    }
    if value.eq_ignore_ascii_case(PLACEHOLDER_PROGRAM_ID) {
        return Err(ConfigError::PlaceholderProgramId(value.to_string()));
    }
    let address = value
        .parse::<Address>()
        .map_err(|source| ConfigError::InvalidProgramId {
            value: value.to_string(),
            source,
        })?;
    if address.is_zero() {
        return Err(ConfigError::ReservedProgramId);
    }
    Ok(address)
}

/// Every field optional: the same shape is read from the config file and built from flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub cluster: Option<String>,
    pub program_id: Option<String>,
    pub keypair: Option<PathBuf>,
    pub idl: Option<PathBuf>,
    pub commitment: Option<Commitment>,
    pub preflight_commitment: Option<Commitment>,
    pub call_timeout_secs: Option<u64>,
    pub nonce: Option<u8>,
    pub topup_amount: Option<u64>,
    pub payload_hex: Option<String>,
    pub executor: Option<String>,
    pub gas_pass_keypair: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fields set in `over` win.
    pub fn merge(self, over: FileConfig) -> FileConfig {
        FileConfig {
            cluster: over.cluster.or(self.cluster),
            program_id: over.program_id.or(self.program_id),
            keypair: over.keypair.or(self.keypair),
            idl: over.idl.or(self.idl),
            commitment: over.commitment.or(self.commitment),
            preflight_commitment: over.preflight_commitment.or(self.preflight_commitment),
            call_timeout_secs: over.call_timeout_secs.or(self.call_timeout_secs),
            nonce: over.nonce.or(self.nonce),
            topup_amount: over.topup_amount.or(self.topup_amount),
            payload_hex: over.payload_hex.or(self.payload_hex),
            executor: over.executor.or(self.executor),
            gas_pass_keypair: over.gas_pass_keypair.or(self.gas_pass_keypair),
        }
    }
}

/// Arguments of the domain calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionParams {
    pub nonce: u8,
    pub topup_amount: u64,
    pub payload: Vec<u8>,
    /// Receives the submission fee; the authority when unset.
    pub executor: Option<Address>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            nonce: 0,
            topup_amount: DEFAULT_TOPUP_AMOUNT,
            payload: DEFAULT_PAYLOAD.to_vec(),
            executor: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub endpoint: EndpointConfig,
    pub keypair: Option<PathBuf>,
    pub idl: Option<PathBuf>,
    pub call_timeout: Option<Duration>,
    pub params: SessionParams,
    pub gas_pass_keypair: Option<PathBuf>,
}

impl SessionSettings {
    pub fn resolve(config: FileConfig) -> Result<Self, ConfigError> {
        let cluster = match config.cluster.as_deref() {
            Some(name) => name.parse()?,
            None => Cluster::default(),
        };
        let program_id = config.program_id.ok_or(ConfigError::MissingProgramId)?;
        let endpoint = EndpointConfig::new(cluster, &program_id)?.with_commitment(
            config.commitment.unwrap_or(Commitment::Confirmed),
            config.preflight_commitment.unwrap_or(Commitment::Processed),
        );

        let call_timeout = match config.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let topup_amount = config.topup_amount.unwrap_or(DEFAULT_TOPUP_AMOUNT);
        if topup_amount == 0 {
            return Err(ConfigError::Invalid {
                field: "topup_amount",
                reason: "must be greater than zero".into(),
            });
        }
        let payload = match config.payload_hex {
            Some(hex_str) => {
                hex::decode(hex_str.trim()).map_err(|e| ConfigError::Invalid {
                    field: "payload_hex",
                    reason: e.to_string(),
                })?
            }
            None => DEFAULT_PAYLOAD.to_vec(),
        };
        let executor = config
            .executor
            .map(|value| {
                value
                    .parse::<Address>()
                    .map_err(|source| ConfigError::InvalidAddress {
                        field: "executor",
                        value,
                        source,
                    })
            })
            .transpose()?;

        Ok(Self {
            endpoint,
            keypair: config.keypair,
            idl: config.idl,
            call_timeout,
            params: SessionParams {
                nonce: config.nonce.unwrap_or(0),
                topup_amount,
                payload,
                executor,
            },
            gas_pass_keypair: config.gas_pass_keypair,
        })
    }
}
