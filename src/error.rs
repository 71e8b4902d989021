//! Error taxonomy of a GAS PASS session.
//!
//! Each component owns one enum; [`SessionError`] wraps the first failure together with
//! the step that produced it. Nothing here is retried: every error ends the session.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::orchestrator::Step;
use crate::wire::{Address, AddressError};

/// Bad static input, detected before any network access.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("program id is required (--program-id or GASPASS_PROGRAM_ID)")]
    MissingProgramId,
    #[error("program id `{0}` is a placeholder, supply the deployed program address")]
    PlaceholderProgramId(String),
    #[error("invalid program id `{value}`: {source}")]
    InvalidProgramId {
        value: String,
        #[source]
        source: AddressError,
    },
    #[error("program id must not be the system program")]
    ReservedProgramId,
    #[error("invalid {field} address `{value}`: {source}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        #[source]
        source: AddressError,
    },
    #[error(
        "unknown cluster `{0}` (expected devnet, testnet, mainnet-beta, localnet, simulated or an http(s) URL)"
    )]
    UnknownCluster(String),
    #[error("unknown commitment `{0}` (expected processed, confirmed or finalized)")]
    UnknownCommitment(String),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of the transport seam beneath a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("connection is closed")]
    Closed,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("instruction {instruction} failed with custom program error {code}: {message}")]
    Program {
        instruction: u8,
        code: u32,
        message: String,
    },
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::InvalidResponse(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("handshake with {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("no signing credential supplied (--keypair or GASPASS_KEYPAIR)")]
    MissingCredential,
    #[error("signing credential rejected: {0}")]
    Rejected(String),
    #[error("failed to load keypair {path}: {reason}")]
    Keypair { path: PathBuf, reason: String },
    #[error("connection is not established")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum InterfaceLoadError {
    #[error("interface description is missing: {0}")]
    Missing(String),
    #[error("malformed interface description: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported interface schema version `{found}` (expected {expected}.x)")]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
    #[error("interface targets program {declared}, session program is {expected}")]
    ProgramMismatch { declared: Address, expected: Address },
    #[error("instruction `{0}` is not declared")]
    MissingInstruction(&'static str),
    #[error("instruction `{name}` is incompatible: {reason}")]
    IncompatibleInstruction { name: String, reason: String },
    #[error("account type `{name}` is incompatible: {reason}")]
    IncompatibleAccount { name: String, reason: String },
}

/// Domain failures surfaced by the program interface.
#[derive(Debug, Error)]
pub enum ProgramCallError {
    #[error("gas pass account {0} is already initialized")]
    AlreadyInitialized(Address),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("{operation} failed: {reason}")]
    RemoteExecution {
        operation: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    InterfaceLoad(#[from] InterfaceLoadError),
    #[error(transparent)]
    Program(#[from] ProgramCallError),
}

#[derive(Debug, Error)]
#[error("step `{step}` failed: {cause}")]
pub struct SessionError {
    pub step: Step,
    #[source]
    pub cause: StepError,
}

impl SessionError {
    pub fn at<E: Into<StepError>>(step: Step) -> impl FnOnce(E) -> SessionError {
        move |err| SessionError {
            step,
            cause: err.into(),
        }
    }
}
