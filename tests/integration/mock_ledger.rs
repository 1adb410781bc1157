//! Mock ledger for integration testing.
//!
//! Provides a deterministic `LedgerClient` that keeps balance, fee rate and
//! pending nonce in memory, decodes every broadcast transaction, and can be
//! told to fail at a specific call. `MockConnector` maps endpoint URLs to
//! mock ledgers and can take endpoints down.

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence::ledger::{native_to_wei, LedgerClient, LedgerConnector, LedgerError};

/// Which call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Probe,
    Balance,
    GasPrice,
    Nonce,
    Broadcast,
    Confirmation,
    Revert,
}

/// A transaction seen by the mock, decoded from its raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub hash: B256,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub chain_id: Option<u64>,
}

struct LedgerState {
    chain_id: u64,
    block: u64,
    balance: U256,
    gas_price: u128,
    nonce: u64,
    failures: HashSet<FailPoint>,
    issued_nonces: Vec<u64>,
    broadcasts: Vec<Broadcast>,
}

/// In-memory ledger. Clones share state.
#[derive(Clone)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
    /// Simulated network latency on writes.
    latency: Duration,
}

impl MockLedger {
    /// Mainnet-like ledger holding `balance` native units.
    pub fn new(balance: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                chain_id: 1,
                block: 19_000_000,
                balance: native_to_wei(balance).unwrap(),
                gas_price: 30_000_000_000,
                nonce: 5,
                failures: HashSet::new(),
                issued_nonces: Vec::new(),
                broadcasts: Vec::new(),
            })),
            latency: Duration::from_millis(5),
        }
    }

    pub fn with_chain_id(self, chain_id: u64) -> Self {
        self.state.lock().unwrap().chain_id = chain_id;
        self
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().unwrap().balance = native_to_wei(balance).unwrap();
    }

    /// Make every subsequent `point` call fail.
    pub fn fail(&self, point: FailPoint) {
        self.state.lock().unwrap().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn broadcasts(&self) -> Vec<Broadcast> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn issued_nonces(&self) -> Vec<u64> {
        self.state.lock().unwrap().issued_nonces.clone()
    }

    fn check(&self, point: FailPoint) -> Result<(), LedgerError> {
        if self.state.lock().unwrap().failures.contains(&point) {
            return Err(LedgerError::Rpc(format!("forced {point:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.check(FailPoint::Probe)?;
        Ok(self.state.lock().unwrap().block)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.check(FailPoint::Probe)?;
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn balance(&self, _address: Address) -> Result<U256, LedgerError> {
        self.check(FailPoint::Balance)?;
        Ok(self.state.lock().unwrap().balance)
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.check(FailPoint::GasPrice)?;
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, LedgerError> {
        self.check(FailPoint::Nonce)?;
        let mut state = self.state.lock().unwrap();
        let nonce = state.nonce;
        state.issued_nonces.push(nonce);
        Ok(nonce)
    }

    async fn broadcast(&self, raw: Vec<u8>) -> Result<B256, LedgerError> {
        tokio::time::sleep(self.latency).await;
        if self.state.lock().unwrap().failures.contains(&FailPoint::Broadcast) {
            return Err(LedgerError::Broadcast("nonce too low".into()));
        }

        let envelope = TxEnvelope::decode_2718(&mut raw.as_slice())
            .map_err(|e| LedgerError::Broadcast(format!("undecodable transaction: {e}")))?;
        let seen = Broadcast {
            hash: *envelope.tx_hash(),
            nonce: envelope.nonce(),
            to: envelope.to(),
            value: envelope.value(),
            gas_limit: envelope.gas_limit(),
            gas_price: envelope.gas_price(),
            chain_id: envelope.chain_id(),
        };

        let mut state = self.state.lock().unwrap();
        if seen.nonce != state.nonce {
            return Err(LedgerError::Broadcast(format!(
                "nonce {} does not match pending {}",
                seen.nonce, state.nonce
            )));
        }
        state.nonce += 1;
        state.balance = state.balance.saturating_sub(seen.value);
        state.broadcasts.push(seen.clone());
        Ok(seen.hash)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256, _confirmations: u64) -> Result<u64, LedgerError> {
        tokio::time::sleep(self.latency).await;
        let mut state = self.state.lock().unwrap();
        if state.failures.contains(&FailPoint::Confirmation) {
            return Err(LedgerError::Confirmation {
                tx_hash,
                reason: "timed out waiting for receipt".into(),
            });
        }
        if state.failures.contains(&FailPoint::Revert) {
            return Err(LedgerError::Reverted(tx_hash));
        }
        state.block += 1;
        Ok(state.block)
    }
}

/// Hands out mock ledgers by URL. Unknown or downed URLs refuse connections.
#[derive(Clone, Default)]
pub struct MockConnector {
    ledgers: Arc<Mutex<HashMap<String, MockLedger>>>,
    down: Arc<Mutex<HashSet<String>>>,
}

impl MockConnector {
    pub fn with(self, url: &str, ledger: MockLedger) -> Self {
        self.ledgers.lock().unwrap().insert(url.to_string(), ledger);
        self
    }

    pub fn take_down(&self, url: &str) {
        self.down.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl LedgerConnector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError> {
        if self.down.lock().unwrap().contains(endpoint) {
            return Err(LedgerError::Rpc(format!("connection refused: {endpoint}")));
        }
        let ledger = self
            .ledgers
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc(format!("unknown host: {endpoint}")))?;
        Ok(Arc::new(ledger))
    }
}
