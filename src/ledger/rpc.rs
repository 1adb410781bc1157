//! JSON-RPC ledger client over alloy's HTTP transport.

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{PendingTransactionBuilder, Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::transports::http::Http;
use alloy::transports::TransportError;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{LedgerClient, LedgerConnector, LedgerError};
use crate::config::LedgerConfig;

/// HTTP JSON-RPC connection to one endpoint.
#[derive(Clone)]
pub struct RpcLedger {
    endpoint: String,
    provider: RootProvider<Ethereum>,
    confirmation_timeout: Duration,
}

impl RpcLedger {
    /// Build a client for `endpoint`. No request is made yet.
    pub fn connect(
        endpoint: &str,
        request_timeout: Duration,
        confirmation_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let invalid = |reason: String| LedgerError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        let client = RpcClient::new(Http::with_client(http, url), false);
        Ok(Self {
            endpoint: endpoint.to_string(),
            provider: RootProvider::new(client),
            confirmation_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rpc_error(&self, call: &str, err: impl std::fmt::Display) -> LedgerError {
        LedgerError::Rpc(format!("{call} via {}: {err}", self.endpoint))
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| self.rpc_error("eth_blockNumber", e))
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| self.rpc_error("eth_chainId", e))
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| self.rpc_error("eth_getBalance", e))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.rpc_error("eth_gasPrice", e))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| self.rpc_error("eth_getTransactionCount", e))
    }

    async fn broadcast(&self, raw: Vec<u8>) -> Result<B256, LedgerError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| broadcast_error(&self.endpoint, e))?;
        let tx_hash = *pending.tx_hash();
        debug!(endpoint = %self.endpoint, tx_hash = %tx_hash, "Transaction broadcast");
        Ok(tx_hash)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256, confirmations: u64) -> Result<u64, LedgerError> {
        let receipt = PendingTransactionBuilder::new(self.provider.clone(), tx_hash)
            .with_required_confirmations(confirmations.max(1))
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Confirmation {
                tx_hash,
                reason: e.to_string(),
            })?;

        if !receipt.status() {
            return Err(LedgerError::Reverted(tx_hash));
        }
        receipt.block_number().ok_or_else(|| LedgerError::Confirmation {
            tx_hash,
            reason: "receipt has no block number".to_string(),
        })
    }
}

/// A JSON-RPC error response means the node rejected the transaction;
/// anything else never reached a node and counts as a connection failure.
fn broadcast_error(endpoint: &str, err: TransportError) -> LedgerError {
    if err.is_error_resp() {
        LedgerError::Broadcast(format!("{err} ({endpoint})"))
    } else {
        LedgerError::Rpc(format!("eth_sendRawTransaction via {endpoint}: {err}"))
    }
}

/// Opens `RpcLedger` connections with shared timeouts.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    request_timeout: Duration,
    confirmation_timeout: Duration,
}

impl RpcConnector {
    pub fn new(request_timeout: Duration, confirmation_timeout: Duration) -> Self {
        Self {
            request_timeout,
            confirmation_timeout,
        }
    }
}

impl From<&LedgerConfig> for RpcConnector {
    fn from(cfg: &LedgerConfig) -> Self {
        Self::new(cfg.request_timeout(), cfg.confirmation_timeout())
    }
}

#[async_trait]
impl LedgerConnector for RpcConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError> {
        let ledger = RpcLedger::connect(endpoint, self.request_timeout, self.confirmation_timeout)?;
        Ok(Arc::new(ledger))
    }
}
