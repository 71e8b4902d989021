//! JSON-RPC 2.0 over HTTP.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{AccountSnapshot, Transport};
use crate::config::{Commitment, EndpointConfig};
use crate::error::TransportError;
use crate::wire::{Address, Blockhash, Transaction};

const CONFIRM_POLL: Duration = Duration::from_millis(500);
/// Roughly the lifetime of a recent blockhash.
const CONFIRM_LIMIT: Duration = Duration::from_secs(90);

pub struct RpcTransport {
    url: String,
    client: Client,
    commitment: Commitment,
    preflight_commitment: Commitment,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "solana-core")]
    core: String,
}

#[derive(Deserialize)]
struct BlockhashInfo {
    blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<Commitment>,
}

#[derive(Deserialize)]
struct AccountInfo {
    lamports: u64,
    owner: Address,
    data: (String, String),
    #[serde(default)]
    executable: bool,
}

impl RpcTransport {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            url: endpoint.url().to_string(),
            client,
            commitment: endpoint.commitment(),
            preflight_commitment: endpoint.preflight_commitment(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(method, id, "rpc request");

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Rpc {
                code: i64::from(status),
                message,
            });
        }
        let envelope: RpcResponse<T> = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(error));
        }
        envelope
            .result
            .ok_or_else(|| TransportError::InvalidResponse(format!("{method}: missing result")))
    }

    async fn confirm(&self, signature: &str) -> Result<(), TransportError> {
        let started = Instant::now();
        loop {
            let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
                .call("getSignatureStatuses", json!([[signature]]))
                .await?;
            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(classify_transaction_error(&err, "transaction failed".into()));
                }
                if status
                    .confirmation_status
                    .is_some_and(|level| level >= self.commitment)
                {
                    return Ok(());
                }
            }
            if started.elapsed() >= CONFIRM_LIMIT {
                warn!(%signature, "transaction not confirmed before blockhash expiry");
                return Err(TransportError::Timeout(CONFIRM_LIMIT));
            }
            tokio::time::sleep(CONFIRM_POLL).await;
        }
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn version(&self) -> Result<String, TransportError> {
        let info: VersionInfo = self.call("getVersion", json!([])).await?;
        Ok(info.core)
    }

    async fn latest_blockhash(&self) -> Result<Blockhash, TransportError> {
        let info: WithContext<BlockhashInfo> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let bytes = bs58::decode(&info.value.blockhash)
            .into_vec()
            .map_err(|e| TransportError::InvalidResponse(format!("blockhash: {e}")))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| TransportError::InvalidResponse(format!("blockhash of {} bytes", bytes.len())))
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        space: usize,
    ) -> Result<u64, TransportError> {
        self.call("getMinimumBalanceForRentExemption", json!([space]))
            .await
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String, TransportError> {
        let encoded = tx
            .to_base64()
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let signature: String = self
            .call(
                "sendTransaction",
                json!([encoded, {
                    "encoding": "base64",
                    "preflightCommitment": self.preflight_commitment.as_str(),
                }]),
            )
            .await?;
        debug!(%signature, "transaction accepted, awaiting confirmation");
        self.confirm(&signature).await?;
        Ok(signature)
    }

    async fn account(&self, address: &Address) -> Result<Option<AccountSnapshot>, TransportError> {
        let info: WithContext<Option<AccountInfo>> = self
            .call(
                "getAccountInfo",
                json!([address.to_string(), {
                    "encoding": "base64",
                    "commitment": self.commitment.as_str(),
                }]),
            )
            .await?;
        info.value
            .map(|account| -> Result<AccountSnapshot, TransportError> {
                let data = general_purpose::STANDARD
                    .decode(&account.data.0)
                    .map_err(|e| TransportError::InvalidResponse(format!("account data: {e}")))?;
                Ok(AccountSnapshot {
                    lamports: account.lamports,
                    owner: account.owner,
                    data,
                    executable: account.executable,
                })
            })
            .transpose()
    }
}

/// Preflight failures carry the transaction error under `data.err`.
fn classify_rpc_error(error: RpcErrorObject) -> TransportError {
    match error.data.as_ref().and_then(|data| data.get("err")) {
        Some(err) if !err.is_null() => classify_transaction_error(err, error.message),
        _ => TransportError::Rpc {
            code: error.code,
            message: error.message,
        },
    }
}

fn classify_transaction_error(err: &Value, message: String) -> TransportError {
    match err {
        Value::String(kind) if kind.starts_with("InsufficientFunds") => {
            TransportError::InsufficientFunds(kind.clone())
        }
        Value::Object(map) if map.contains_key("InsufficientFundsForRent") => {
            TransportError::InsufficientFunds(err.to_string())
        }
        Value::Object(map) => {
            let Some(Value::Array(parts)) = map.get("InstructionError") else {
                return TransportError::Rejected(format!("{message}: {err}"));
            };
            let instruction = parts
                .first()
                .and_then(Value::as_u64)
                .and_then(|i| u8::try_from(i).ok())
                .unwrap_or_default();
            match parts.get(1) {
                Some(Value::Object(inner)) => match inner.get("Custom").and_then(Value::as_u64) {
                    Some(code) => TransportError::Program {
                        instruction,
                        code: u32::try_from(code).unwrap_or(u32::MAX),
                        message,
                    },
                    None => TransportError::Rejected(format!("{message}: {err}")),
                },
                Some(Value::String(kind)) if kind == "InsufficientFunds" => {
                    TransportError::InsufficientFunds(format!("instruction {instruction}: {kind}"))
                }
                _ => TransportError::Rejected(format!("{message}: {err}")),
            }
        }
        _ => TransportError::Rejected(format!("{message}: {err}")),
    }
}
