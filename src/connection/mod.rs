//! Logical session to a cluster.
//!
//! A [`ConnectionHandle`] exists only after a successful handshake, so "uninitialized"
//! is the absence of a handle. All remote traffic goes through the [`Transport`] seam:
//! [`RpcTransport`] for real clusters, [`crate::ledger::SimulatedCluster`] in process.

mod rpc;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::EndpointConfig;
use crate::error::{ConnectionError, TransportError};
use crate::wire::{Address, Blockhash, Transaction};

pub use rpc::RpcTransport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub lamports: u64,
    pub owner: Address,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Node version string; doubles as the handshake.
    async fn version(&self) -> Result<String, TransportError>;

    async fn latest_blockhash(&self) -> Result<Blockhash, TransportError>;

    async fn minimum_balance_for_rent_exemption(&self, space: usize)
        -> Result<u64, TransportError>;

    /// Submits and waits for the configured commitment. Returns the signature.
    async fn send_transaction(&self, tx: &Transaction) -> Result<String, TransportError>;

    async fn account(&self, address: &Address) -> Result<Option<AccountSnapshot>, TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closed,
}

pub struct ConnectionHandle {
    endpoint: EndpointConfig,
    transport: Arc<dyn Transport>,
    call_timeout: Option<Duration>,
    node_version: String,
    state: ConnectionState,
}

impl ConnectionHandle {
    /// One handshake attempt, no retries.
    pub async fn connect(
        endpoint: EndpointConfig,
        transport: Arc<dyn Transport>,
        call_timeout: Option<Duration>,
    ) -> Result<Self, ConnectionError> {
        let url = endpoint.url().to_string();
        info!(%url, "connecting");
        let node_version = with_deadline(call_timeout, transport.version())
            .await
            .map_err(|err| match err {
                TransportError::Timeout(after) => ConnectionError::Timeout {
                    url: url.clone(),
                    after,
                },
                source => ConnectionError::Unreachable {
                    url: url.clone(),
                    source,
                },
            })?;
        info!(%url, version = %node_version, "connected");
        Ok(Self {
            endpoint,
            transport,
            call_timeout,
            node_version,
            state: ConnectionState::Connected,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn node_version(&self) -> &str {
        &self.node_version
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn close(&mut self) {
        if self.state == ConnectionState::Connected {
            debug!(url = %self.endpoint.url(), "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(TransportError::Closed),
        }
    }

    pub async fn latest_blockhash(&self) -> Result<Blockhash, TransportError> {
        self.ensure_open()?;
        with_deadline(self.call_timeout, self.transport.latest_blockhash()).await
    }

    pub async fn minimum_balance_for_rent_exemption(
        &self,
        space: usize,
    ) -> Result<u64, TransportError> {
        self.ensure_open()?;
        with_deadline(
            self.call_timeout,
            self.transport.minimum_balance_for_rent_exemption(space),
        )
        .await
    }

    pub async fn send_transaction(&self, tx: &Transaction) -> Result<String, TransportError> {
        self.ensure_open()?;
        with_deadline(self.call_timeout, self.transport.send_transaction(tx)).await
    }

    pub async fn account(
        &self,
        address: &Address,
    ) -> Result<Option<AccountSnapshot>, TransportError> {
        self.ensure_open()?;
        with_deadline(self.call_timeout, self.transport.account(address)).await
    }
}

pub(crate) async fn with_deadline<T, F>(limit: Option<Duration>, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cluster;
    use crate::ledger::SimulatedCluster;

    const PROGRAM: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn version(&self) -> Result<String, TransportError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }

        async fn latest_blockhash(&self) -> Result<Blockhash, TransportError> {
            Ok([0; 32])
        }

        async fn minimum_balance_for_rent_exemption(
            &self,
            _space: usize,
        ) -> Result<u64, TransportError> {
            Ok(0)
        }

        async fn send_transaction(&self, _tx: &Transaction) -> Result<String, TransportError> {
            Ok(String::new())
        }

        async fn account(
            &self,
            _address: &Address,
        ) -> Result<Option<AccountSnapshot>, TransportError> {
            Ok(None)
        }
    }

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new(Cluster::Simulated, PROGRAM).unwrap()
    }

    #[tokio::test]
    async fn connect_handshakes_once() {
        let cluster = Arc::new(SimulatedCluster::new());
        let handle = ConnectionHandle::connect(endpoint(), cluster, None)
            .await
            .unwrap();
        assert!(handle.is_connected());
        assert!(handle.node_version().starts_with("gaspass-sim"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_fast() {
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.set_offline(true);
        let err = ConnectionHandle::connect(endpoint(), cluster, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn handshake_honours_call_timeout() {
        let err = ConnectionHandle::connect(
            endpoint(),
            Arc::new(Stalled),
            Some(Duration::from_millis(20)),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ConnectionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn closed_handle_refuses_calls() {
        let cluster = Arc::new(SimulatedCluster::new());
        let mut handle = ConnectionHandle::connect(endpoint(), cluster, None)
            .await
            .unwrap();
        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.latest_blockhash().await,
            Err(TransportError::Closed)
        ));
    }
}
