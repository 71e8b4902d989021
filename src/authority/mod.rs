//! Signing identity bound to a connection.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::{AuthorityError, TransportError};
use crate::wire::{Address, Instruction, Message, Signature, Transaction, WireError};

/// Capability that produces signatures for one address. Acquisition is up to the caller.
pub trait SigningCredential: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, message: &[u8]) -> Signature;

    /// Checked once when the credential is bound.
    fn confirm(&self) -> Result<(), AuthorityError> {
        Ok(())
    }
}

/// Ed25519 keypair held in memory.
pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(bytes: [u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(&bytes),
        }
    }

    /// 64 bytes: secret half then public half, which must match.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, String> {
        let bytes: &[u8; 64] = bytes
            .try_into()
            .map_err(|_| format!("expected 64 keypair bytes, got {}", bytes.len()))?;
        SigningKey::from_keypair_bytes(bytes)
            .map(|secret| Self { secret })
            .map_err(|_| "public key does not match secret key".to_string())
    }

    /// Reads either the JSON byte-array wallet format or a hex secret (32 or 64 bytes).
    pub fn read_file(path: &Path) -> Result<Self, AuthorityError> {
        let fail = |reason: String| AuthorityError::Keypair {
            path: path.to_path_buf(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let raw = raw.trim();
        if raw.starts_with('[') {
            let bytes: Vec<u8> = serde_json::from_str(raw).map_err(|e| fail(e.to_string()))?;
            return Self::from_keypair_bytes(&bytes).map_err(fail);
        }
        let bytes = hex::decode(raw).map_err(|e| fail(format!("invalid hex: {e}")))?;
        match bytes.len() {
            32 => {
                let mut secret = [0u8; 32];
                secret.copy_from_slice(&bytes);
                Ok(Self::from_secret(secret))
            }
            64 => Self::from_keypair_bytes(&bytes).map_err(fail),
            n => Err(fail(format!("expected 32 or 64 key bytes, got {n}"))),
        }
    }

    /// Writes the JSON byte-array format.
    pub fn write_file(&self, path: &Path) -> Result<(), AuthorityError> {
        let fail = |reason: String| AuthorityError::Keypair {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
            }
        }
        let encoded = serde_json::to_string(&self.secret.to_keypair_bytes().to_vec())
            .map_err(|e| fail(e.to_string()))?;
        fs::write(path, encoded).map_err(|e| fail(e.to_string()))
    }
}

impl SigningCredential for Keypair {
    fn address(&self) -> Address {
        Address::new(self.secret.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.secret.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Where the authority's credential comes from; resolved at the bind step.
#[derive(Clone, Default)]
pub enum CredentialSource {
    #[default]
    None,
    File(PathBuf),
    Provided(Arc<dyn SigningCredential>),
}

impl CredentialSource {
    pub fn acquire(&self) -> Result<Option<Arc<dyn SigningCredential>>, AuthorityError> {
        match self {
            CredentialSource::None => Ok(None),
            CredentialSource::File(path) => {
                let keypair = Keypair::read_file(path)?;
                Ok(Some(Arc::new(keypair)))
            }
            CredentialSource::Provided(credential) => Ok(Some(Arc::clone(credential))),
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::None => f.write_str("None"),
            CredentialSource::File(path) => f.debug_tuple("File").field(path).finish(),
            CredentialSource::Provided(c) => f.debug_tuple("Provided").field(&c.address()).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Credential plus the connection it signs for. Borrows the connection, so it cannot
/// outlive it.
pub struct AuthorityHandle<'c> {
    connection: &'c ConnectionHandle,
    credential: Arc<dyn SigningCredential>,
}

impl<'c> AuthorityHandle<'c> {
    pub fn bind(
        connection: &'c ConnectionHandle,
        credential: Option<Arc<dyn SigningCredential>>,
    ) -> Result<Self, AuthorityError> {
        if !connection.is_connected() {
            return Err(AuthorityError::NotConnected);
        }
        let credential = credential.ok_or(AuthorityError::MissingCredential)?;
        credential.confirm()?;
        info!(authority = %credential.address(), "authority bound");
        Ok(Self {
            connection,
            credential,
        })
    }

    pub fn address(&self) -> Address {
        self.credential.address()
    }

    pub fn connection(&self) -> &'c ConnectionHandle {
        self.connection
    }

    /// Signs with the authority as fee payer plus `co_signers`, submits, and returns
    /// the transaction signature.
    pub async fn send_instructions(
        &self,
        instructions: &[Instruction],
        co_signers: &[&dyn SigningCredential],
    ) -> Result<String, SubmitError> {
        let blockhash = self.connection.latest_blockhash().await?;
        let message = Message::compile(&self.address(), instructions, blockhash)?;
        let mut signers: Vec<&dyn SigningCredential> = Vec::with_capacity(1 + co_signers.len());
        signers.push(self.credential.as_ref());
        signers.extend_from_slice(co_signers);
        let tx = Transaction::sign(message, &signers)?;
        debug!(
            instructions = instructions.len(),
            signatures = tx.signatures.len(),
            "submitting transaction"
        );
        Ok(self.connection.send_transaction(&tx).await?)
    }
}
