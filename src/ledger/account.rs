//! Treasury account binding.
//!
//! The registry owns the signing key and lazily binds it to whichever
//! endpoint the selector picks. Binding happens at most once at a time; a
//! connection failure drops the binding so the next call re-runs selection.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::selector::{BoundEndpoint, EndpointSelector};
use super::{wei_to_native, LedgerClient, LedgerError};

/// Unsigned native-unit transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferIntent {
    pub to: Address,
    /// Wei.
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Wei per gas.
    pub gas_price: u128,
    pub chain_id: u64,
}

/// EIP-2718 encoded, signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub raw: Vec<u8>,
    pub tx_hash: B256,
}

/// A signer bound to a live endpoint.
pub struct Account {
    address: Address,
    signer: PrivateKeySigner,
    endpoint: BoundEndpoint,
}

impl Account {
    pub fn new(signer: PrivateKeySigner, endpoint: BoundEndpoint) -> Self {
        Self {
            address: signer.address(),
            signer,
            endpoint,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint.url
    }

    pub fn chain_id(&self) -> u64 {
        self.endpoint.chain_id
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.endpoint.client
    }

    /// Balance in native units.
    pub async fn balance(&self) -> Result<Decimal, LedgerError> {
        let wei = self.endpoint.client.balance(self.address).await?;
        wei_to_native(wei)
    }

    /// Sign a legacy transfer. Pure; nothing is sent.
    pub fn sign(&self, intent: &TransferIntent) -> Result<SignedTransfer, LedgerError> {
        let mut tx = TxLegacy {
            chain_id: Some(intent.chain_id),
            nonce: intent.nonce,
            gas_price: intent.gas_price,
            gas_limit: intent.gas_limit,
            to: TxKind::Call(intent.to),
            value: intent.value,
            input: Bytes::new(),
        };

        let sig = TxSignerSync::sign_transaction_sync(&self.signer, &mut tx)
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        let signed: TxEnvelope = tx.into_signed(sig).into();
        Ok(SignedTransfer {
            raw: signed.encoded_2718(),
            tx_hash: *signed.tx_hash(),
        })
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("endpoint", &self.endpoint.url)
            .field("chain_id", &self.endpoint.chain_id)
            .finish()
    }
}

/// Process-wide holder of the treasury binding.
pub struct AccountRegistry {
    selector: EndpointSelector,
    key: Option<SecretString>,
    read_timeout: Duration,
    bound: RwLock<Option<Arc<Account>>>,
    binding: Mutex<()>,
}

impl AccountRegistry {
    /// `read_timeout` bounds the balance reads made on behalf of status
    /// queries.
    pub fn new(selector: EndpointSelector, key: Option<SecretString>, read_timeout: Duration) -> Self {
        Self {
            selector,
            key,
            read_timeout,
            bound: RwLock::new(None),
            binding: Mutex::new(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// The bound account, if any. Never touches the network.
    pub fn current(&self) -> Option<Arc<Account>> {
        self.bound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Treasury address: the bound account's, else the one derived from the
    /// configured key.
    pub fn address(&self) -> Option<Address> {
        self.current()
            .map(|a| a.address())
            .or_else(|| self.signer().ok().map(|s| s.address()))
    }

    /// Return the bound account, binding one first if needed.
    pub async fn ensure_account(&self) -> Result<Arc<Account>, LedgerError> {
        if let Some(account) = self.current() {
            return Ok(account);
        }

        let _guard = self.binding.lock().await;
        // Another caller may have bound while we waited.
        if let Some(account) = self.current() {
            return Ok(account);
        }

        let signer = self.signer()?;
        let endpoint = self.selector.select().await?;
        let account = Arc::new(Account::new(signer, endpoint));
        info!(
            address = %account.address(),
            endpoint = account.endpoint(),
            "Treasury account bound"
        );

        *self.bound.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&account));
        Ok(account)
    }

    /// Drop the binding after a connection failure.
    pub fn invalidate(&self) {
        let previous = self
            .bound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(account) = previous {
            warn!(endpoint = account.endpoint(), "Treasury binding invalidated");
        }
    }

    /// Balance of the bound account, bounded by the read timeout. `None`
    /// when unbound or the read fails; never binds.
    pub async fn live_balance(&self) -> Option<Decimal> {
        let account = self.current()?;
        match tokio::time::timeout(self.read_timeout, account.balance()).await {
            Ok(Ok(balance)) => Some(balance),
            Ok(Err(e)) => {
                warn!(error = %e, "Treasury balance read failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.read_timeout, "Treasury balance read timed out");
                None
            }
        }
    }

    fn signer(&self) -> Result<PrivateKeySigner, LedgerError> {
        let key = self.key.as_ref().ok_or(LedgerError::NotConfigured)?;
        PrivateKeySigner::from_str(key.expose_secret().trim())
            .map_err(|e| LedgerError::InvalidKey(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
