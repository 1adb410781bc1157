//! Withdrawal pipeline.
//!
//! Validates a request, re-reads the live treasury balance, applies the two
//! balance gates, then builds, signs, broadcasts and confirms a plain value
//! transfer. Engine earnings are reconciled only after confirmed inclusion.
//!
//! One submission runs at a time: the slot is held from account readiness
//! through confirmation, so a pending nonce is never handed out twice.

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::Engine;
use crate::ledger::{native_to_wei, parse_address, Account, AccountRegistry, LedgerError, TransferIntent};
use crate::types::{
    BalanceContext, SubmissionStage, WithdrawalError, WithdrawalReceipt, WithdrawalRequest,
};

const DESTINATION_FIELDS: [&str; 3] = ["to", "toAddress", "destination"];
const AMOUNT_FIELDS: [&str; 3] = ["amountETH", "amountEth", "amount"];

/// Thresholds and transaction parameters for withdrawals.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalPolicy {
    pub min_gas_reserve: Decimal,
    pub gas_reserve_buffer: Decimal,
    pub gas_limit: u64,
    /// Wei per gas, used when the endpoint cannot quote a fee.
    pub fallback_gas_price: u128,
    pub confirmations: u64,
    pub explorer_tx_url: String,
    pub fee_recipient: Option<Address>,
    pub reference_price: f64,
}

impl WithdrawalPolicy {
    /// Build from configuration. A configured fee recipient must be a
    /// valid address.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let fee_recipient = cfg
            .treasury
            .fee_recipient
            .as_deref()
            .map(|raw| {
                parse_address(raw)
                    .map_err(anyhow::Error::msg)
                    .context("Invalid treasury.fee_recipient")
            })
            .transpose()?;

        Ok(Self {
            fee_recipient,
            ..Self::without_recipient(cfg)
        })
    }

    fn without_recipient(cfg: &AppConfig) -> Self {
        Self {
            min_gas_reserve: cfg.treasury.min_gas_reserve,
            gas_reserve_buffer: cfg.treasury.gas_reserve_buffer,
            gas_limit: cfg.ledger.transfer_gas_limit,
            fallback_gas_price: cfg.ledger.fallback_gas_price_wei(),
            confirmations: cfg.ledger.confirmations,
            explorer_tx_url: cfg.ledger.explorer_tx_url.clone(),
            fee_recipient: None,
            reference_price: cfg.economics.reference_price,
        }
    }

    /// Explorer link for a transaction. `{hash}` in the pattern is replaced;
    /// otherwise the hash is appended.
    pub fn explorer_link(&self, tx_hash: &B256) -> String {
        let hash = tx_hash.to_string();
        if self.explorer_tx_url.contains("{hash}") {
            self.explorer_tx_url.replace("{hash}", &hash)
        } else {
            format!("{}{}", self.explorer_tx_url, hash)
        }
    }

    /// `balance − buffer`, floored at zero.
    pub fn max_withdrawable(&self, balance: Decimal) -> Decimal {
        (balance - self.gas_reserve_buffer).max(Decimal::ZERO)
    }
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self::without_recipient(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Parse a JSON withdrawal body. The destination falls back to
/// `default_destination`; the amount may be a number or a numeric string.
pub fn parse_request(
    body: &Value,
    default_destination: Option<Address>,
) -> Result<WithdrawalRequest, WithdrawalError> {
    let destination = match first_field(body, &DESTINATION_FIELDS) {
        Some(Value::String(raw)) => parse_address(raw).map_err(WithdrawalError::InvalidRequest)?,
        Some(other) => {
            return Err(WithdrawalError::InvalidRequest(format!(
                "destination must be a string, got {other}"
            )))
        }
        None => default_destination.ok_or_else(|| {
            WithdrawalError::InvalidRequest(
                "destination address required (no fee recipient configured)".into(),
            )
        })?,
    };

    let amount = match first_field(body, &AMOUNT_FIELDS) {
        Some(Value::Number(n)) => parse_amount(&n.to_string()),
        Some(Value::String(s)) => parse_amount(s),
        Some(other) => Err(format!("amount must be a number, got {other}")),
        None => Err("amount required".to_string()),
    }
    .map_err(WithdrawalError::InvalidRequest)?;

    Ok(WithdrawalRequest { destination, amount })
}

/// First alias present with a non-null value.
fn first_field<'a>(body: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| body.get(name))
        .find(|v| !v.is_null())
}

fn parse_amount(raw: &str) -> Result<Decimal, String> {
    let text = raw.trim();
    let amount = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| format!("amount {text:?} is not a finite number"))?;
    if amount <= Decimal::ZERO {
        return Err(format!("amount must be positive, got {amount}"));
    }
    Ok(amount.normalize())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct WithdrawalPipeline {
    engine: Arc<Engine>,
    registry: Arc<AccountRegistry>,
    policy: WithdrawalPolicy,
    submission: Mutex<()>,
}

impl WithdrawalPipeline {
    pub fn new(engine: Arc<Engine>, registry: Arc<AccountRegistry>, policy: WithdrawalPolicy) -> Self {
        Self {
            engine,
            registry,
            policy,
            submission: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &WithdrawalPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    /// Parse a JSON body and run the withdrawal.
    pub async fn withdraw_json(&self, body: &Value) -> Result<WithdrawalReceipt, WithdrawalError> {
        let request = parse_request(body, self.policy.fee_recipient)?;
        self.withdraw(request).await
    }

    /// Run a validated withdrawal to confirmed inclusion.
    pub async fn withdraw(&self, request: WithdrawalRequest) -> Result<WithdrawalReceipt, WithdrawalError> {
        let request_id = Uuid::new_v4();
        if request.amount <= Decimal::ZERO {
            return Err(WithdrawalError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        let value = native_to_wei(request.amount)
            .map_err(|e| WithdrawalError::InvalidRequest(e.to_string()))?;
        if value.is_zero() {
            return Err(WithdrawalError::InvalidRequest(format!(
                "amount {} is below one wei",
                request.amount
            )));
        }

        info!(
            request_id = %request_id,
            destination = %request.destination,
            amount = %request.amount,
            "Withdrawal requested"
        );

        let _slot = self.submission.lock().await;

        let account = self
            .registry
            .ensure_account()
            .await
            .map_err(WithdrawalError::AccountUnavailable)?;

        let balance = match account.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                self.registry.invalidate();
                return Err(WithdrawalError::AccountUnavailable(e));
            }
        };
        let context = self.balance_context(&account, balance);

        if balance < self.policy.min_gas_reserve {
            warn!(
                request_id = %request_id,
                balance = %balance,
                minimum = %self.policy.min_gas_reserve,
                "Withdrawal rejected: treasury below gas reserve"
            );
            return Err(WithdrawalError::InsufficientGasReserve(context));
        }

        if balance < request.amount + self.policy.gas_reserve_buffer {
            warn!(
                request_id = %request_id,
                balance = %balance,
                requested = %request.amount,
                max_withdrawable = %context.max_withdrawable,
                "Withdrawal rejected: insufficient funds"
            );
            return Err(WithdrawalError::InsufficientFunds {
                requested: request.amount,
                context,
            });
        }

        let client = account.client();
        let gas_price = match client.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    error = %e,
                    fallback_wei = self.policy.fallback_gas_price,
                    "Fee quote unavailable; using fallback rate"
                );
                self.policy.fallback_gas_price
            }
        };

        let nonce = match client.pending_nonce(account.address()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                if is_connection_failure(&e) {
                    self.registry.invalidate();
                }
                return Err(submission(SubmissionStage::Sequence, None, context, e));
            }
        };

        let intent = TransferIntent {
            to: request.destination,
            value,
            nonce,
            gas_limit: self.policy.gas_limit,
            gas_price,
            chain_id: account.chain_id(),
        };
        let signed = account
            .sign(&intent)
            .map_err(|e| submission(SubmissionStage::Signing, None, context.clone(), e))?;

        info!(
            request_id = %request_id,
            nonce,
            gas_price_wei = gas_price,
            tx_hash = %signed.tx_hash,
            "Broadcasting withdrawal"
        );

        let tx_hash = match client.broadcast(signed.raw).await {
            Ok(hash) => hash,
            Err(e) => {
                if is_connection_failure(&e) {
                    self.registry.invalidate();
                }
                return Err(submission(
                    SubmissionStage::Broadcast,
                    Some(signed.tx_hash),
                    context,
                    e,
                ));
            }
        };

        let block = client
            .wait_for_inclusion(tx_hash, self.policy.confirmations)
            .await
            .map_err(|e| submission(SubmissionStage::Confirmation, Some(tx_hash), context.clone(), e))?;

        let monetary = request.amount.to_f64().unwrap_or(0.0) * self.policy.reference_price;
        let remaining = self.engine.reconcile_withdrawal(monetary);

        info!(
            request_id = %request_id,
            tx_hash = %tx_hash,
            block,
            deducted = monetary,
            total_earned = remaining,
            "Withdrawal confirmed"
        );

        Ok(WithdrawalReceipt {
            success: true,
            transaction_id: tx_hash.to_string(),
            from: context.treasury_wallet,
            to: request.destination.to_checksum(None),
            amount: request.amount,
            block_reference: block,
            explorer_url: self.policy.explorer_link(&tx_hash),
        })
    }

    fn balance_context(&self, account: &Account, balance: Decimal) -> BalanceContext {
        BalanceContext {
            treasury_wallet: account.address().to_checksum(None),
            current_balance: balance,
            min_required: self.policy.min_gas_reserve,
            gas_reserve: self.policy.gas_reserve_buffer,
            max_withdrawable: self.policy.max_withdrawable(balance),
        }
    }
}

fn submission(
    stage: SubmissionStage,
    tx_hash: Option<B256>,
    context: BalanceContext,
    source: LedgerError,
) -> WithdrawalError {
    warn!(stage = %stage, error = %source, "Withdrawal submission failed");
    WithdrawalError::Submission {
        stage,
        tx_hash: tx_hash.map(|h| h.to_string()),
        context,
        source,
    }
}

fn is_connection_failure(e: &LedgerError) -> bool {
    matches!(e, LedgerError::Rpc(_) | LedgerError::Timeout(_))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
