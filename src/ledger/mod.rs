//! Ledger access.
//!
//! Defines the `LedgerClient` trait (the narrow set of JSON-RPC reads and
//! writes the backend needs) and the `LedgerConnector` that opens one per
//! endpoint URL. `rpc` implements both over alloy; `selector` does the
//! endpoint failover and `account` binds the treasury signer to the winner.

pub mod rpc;
pub mod selector;
pub mod account;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;

pub use account::{Account, AccountRegistry, SignedTransfer, TransferIntent};
pub use rpc::{RpcConnector, RpcLedger};
pub use selector::{BoundEndpoint, EndpointSelector};

/// Wei per native unit (18 decimals).
pub const WEI_PER_NATIVE: u64 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("No reachable endpoint ({attempted} tried)")]
    NoReachableEndpoint { attempted: usize },

    #[error("Treasury signing key not configured")]
    NotConfigured,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint is on chain {actual}, expected {expected}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Broadcast rejected: {0}")]
    Broadcast(String),

    #[error("Confirmation failed for {tx_hash}: {reason}")]
    Confirmation { tx_hash: B256, reason: String },

    #[error("Transaction {0} reverted")]
    Reverted(B256),

    #[error("Value out of range: {0}")]
    Conversion(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One live connection to a ledger endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest block height. Used as the liveness probe.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Balance in wei.
    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// Current legacy fee rate in wei per gas.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Next sequence number including pending transactions.
    async fn pending_nonce(&self, address: Address) -> Result<u64, LedgerError>;

    /// Submit a signed, EIP-2718 encoded transaction. Returns its hash.
    async fn broadcast(&self, raw: Vec<u8>) -> Result<B256, LedgerError>;

    /// Wait until the transaction has `confirmations` blocks and return the
    /// block it was included in.
    async fn wait_for_inclusion(&self, tx_hash: B256, confirmations: u64) -> Result<u64, LedgerError>;
}

/// Opens a `LedgerClient` for an endpoint URL.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError>;
}

// ---------------------------------------------------------------------------
// Units and addresses
// ---------------------------------------------------------------------------

/// Convert wei to native units.
pub fn wei_to_native(wei: U256) -> Result<Decimal, LedgerError> {
    let raw = u128::try_from(wei)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .ok_or_else(|| LedgerError::Conversion(format!("{wei} wei")))?;
    Decimal::try_from_i128_with_scale(raw, 18)
        .map(|d| d.normalize())
        .map_err(|e| LedgerError::Conversion(e.to_string()))
}

/// Convert native units to wei. Precision finer than 1 wei is truncated.
pub fn native_to_wei(amount: Decimal) -> Result<U256, LedgerError> {
    if amount.is_sign_negative() {
        return Err(LedgerError::Conversion(format!("negative amount {amount}")));
    }
    amount
        .checked_mul(Decimal::from(WEI_PER_NATIVE))
        .map(|v| v.trunc())
        .and_then(|v| v.to_u128())
        .map(U256::from)
        .ok_or_else(|| LedgerError::Conversion(format!("{amount} native units")))
}

/// Parse a `0x` address. All-lowercase and all-uppercase hex are accepted;
/// mixed case must carry a valid EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, String> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| format!("address {trimmed:?} must start with 0x"))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address {trimmed:?} is not 20 hex bytes"));
    }

    let normalized = format!("0x{hex}");
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(&normalized, None)
            .map_err(|_| format!("address {trimmed:?} has an invalid checksum"))
    } else {
        Address::from_str(&normalized).map_err(|e| format!("address {trimmed:?}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
