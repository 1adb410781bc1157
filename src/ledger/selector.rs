//! Endpoint selector: ordered failover across configured RPC endpoints.
//!
//! Each endpoint gets one bounded probe (block height, then chain id). The
//! first endpoint that answers in time on the expected network wins. When
//! none do, `NoReachableEndpoint` is returned; callers may try again later.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{LedgerClient, LedgerConnector, LedgerError};
use crate::config::LedgerConfig;

/// A probed, healthy connection.
#[derive(Clone)]
pub struct BoundEndpoint {
    pub url: String,
    pub chain_id: u64,
    pub block_height: u64,
    pub client: Arc<dyn LedgerClient>,
}

impl std::fmt::Debug for BoundEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEndpoint")
            .field("url", &self.url)
            .field("chain_id", &self.chain_id)
            .field("block_height", &self.block_height)
            .finish()
    }
}

pub struct EndpointSelector {
    endpoints: Vec<String>,
    network_id: u64,
    probe_timeout: Duration,
    connector: Arc<dyn LedgerConnector>,
}

impl EndpointSelector {
    pub fn new(
        endpoints: Vec<String>,
        network_id: u64,
        probe_timeout: Duration,
        connector: Arc<dyn LedgerConnector>,
    ) -> Self {
        Self {
            endpoints,
            network_id,
            probe_timeout,
            connector,
        }
    }

    pub fn from_config(cfg: &LedgerConfig, connector: Arc<dyn LedgerConnector>) -> Self {
        Self::new(cfg.endpoints.clone(), cfg.network_id, cfg.probe_timeout(), connector)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    /// Probe endpoints in order and return the first healthy one.
    pub async fn select(&self) -> Result<BoundEndpoint, LedgerError> {
        for url in &self.endpoints {
            match self.probe(url).await {
                Ok(bound) => {
                    info!(
                        endpoint = %bound.url,
                        chain_id = bound.chain_id,
                        block = bound.block_height,
                        "Ledger endpoint selected"
                    );
                    return Ok(bound);
                }
                Err(e) => {
                    warn!(endpoint = %url, error = %e, "Ledger endpoint rejected");
                }
            }
        }

        Err(LedgerError::NoReachableEndpoint {
            attempted: self.endpoints.len(),
        })
    }

    async fn probe(&self, url: &str) -> Result<BoundEndpoint, LedgerError> {
        let check = async {
            let client = self.connector.connect(url).await?;
            let block_height = client.block_number().await?;
            let chain_id = client.chain_id().await?;
            Ok::<_, LedgerError>((client, block_height, chain_id))
        };

        let (client, block_height, chain_id) = timeout(self.probe_timeout, check)
            .await
            .map_err(|_| LedgerError::Timeout(self.probe_timeout))??;

        if chain_id != self.network_id {
            return Err(LedgerError::WrongNetwork {
                expected: self.network_id,
                actual: chain_id,
            });
        }

        Ok(BoundEndpoint {
            url: url.to_string(),
            chain_id,
            block_height,
            client,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
