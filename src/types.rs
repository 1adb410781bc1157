//! Shared types for the CADENCE backend.
//!
//! These types form the data model used across all modules: the synthetic
//! strategy catalog, the aggregate counters written by the schedulers, and
//! the withdrawal request/receipt pair. They carry no behaviour beyond small
//! accessors so that engine, ledger and dashboard modules can depend on them
//! without circular references.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::ledger::LedgerError;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// A synthetic yield-bearing unit with a precomputed expected profit per execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    /// 1-based, assigned in generation order.
    pub id: u32,
    pub protocol: &'static str,
    pub name: String,
    /// Annual yield estimate in percent.
    pub annual_yield: f64,
    /// Monetary units per execution.
    pub expected_profit: f64,
    pub execution_count: u64,
    pub cumulative_profit: f64,
    pub is_active: bool,
    pub last_executed: Option<DateTime<Utc>>,
}

impl Strategy {
    /// Record one execution with the sampled profit.
    pub fn record_execution(&mut self, profit: f64, at: DateTime<Utc>) {
        self.execution_count += 1;
        self.cumulative_profit += profit;
        self.last_executed = Some(at);
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) yield {:.1}% | {} runs | ${:.2}",
            self.id,
            self.name,
            self.protocol,
            self.annual_yield,
            self.execution_count,
            self.cumulative_profit,
        )
    }
}

// ---------------------------------------------------------------------------
// Aggregate state
// ---------------------------------------------------------------------------

/// Process-wide running totals written by the schedulers.
///
/// `total_earned` only moves down through withdrawal reconciliation and is
/// clamped at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    pub active: bool,
    pub total_trades: u64,
    pub total_earned: f64,
    /// Profit booked by individual trade ticks.
    pub trade_earned: f64,
    /// Profit booked by pulses.
    pub pulse_earned: f64,
    /// Monetary value deducted by confirmed withdrawals.
    pub withdrawn_value: f64,
    /// Executions inside the open measurement window.
    pub current_window_trades: u64,
    /// Executions counted in the last closed window.
    pub trades_per_second: u64,
    pub peak_tps: u64,
    pub started_at: DateTime<Utc>,
    pub window_started_at: DateTime<Utc>,
    pub pulses_executed: u64,
}

impl AggregateState {
    pub fn new(active: bool) -> Self {
        let now = Utc::now();
        Self {
            active,
            total_trades: 0,
            total_earned: 0.0,
            trade_earned: 0.0,
            pulse_earned: 0.0,
            withdrawn_value: 0.0,
            current_window_trades: 0,
            trades_per_second: 0,
            peak_tps: 0,
            started_at: now,
            window_started_at: now,
            pulses_executed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler outputs
// ---------------------------------------------------------------------------

/// One executed trade tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub strategy_id: u32,
    pub profit: f64,
}

/// Side effects of one pulse (timer-driven or manual).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseReport {
    /// Monetary units.
    pub profit: f64,
    /// Same profit expressed in native units.
    pub profit_native: f64,
    pub recipients: usize,
    pub pulses_executed: u64,
    pub current_tps: u64,
}

// ---------------------------------------------------------------------------
// Withdrawal
// ---------------------------------------------------------------------------

/// A validated withdrawal request.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub destination: Address,
    /// Native units, strictly positive.
    pub amount: Decimal,
}

/// Confirmed withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub success: bool,
    pub transaction_id: String,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub block_reference: u64,
    pub explorer_url: String,
}

/// Balance figures attached to withdrawal failures so callers can self-correct.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceContext {
    pub treasury_wallet: String,
    pub current_balance: Decimal,
    pub min_required: Decimal,
    pub gas_reserve: Decimal,
    pub max_withdrawable: Decimal,
}

/// Pipeline stage in which a submission failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Sequence,
    Signing,
    Broadcast,
    Confirmation,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStage::Sequence => write!(f, "sequence"),
            SubmissionStage::Signing => write!(f, "signing"),
            SubmissionStage::Broadcast => write!(f, "broadcast"),
            SubmissionStage::Confirmation => write!(f, "confirmation"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Every way a withdrawal can fail. None of them mutate engine state.
#[derive(Debug, thiserror::Error)]
pub enum WithdrawalError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Treasury account unavailable: {0}")]
    AccountUnavailable(#[source] LedgerError),

    #[error("Treasury needs gas funding: balance {}, minimum {}", .0.current_balance, .0.min_required)]
    InsufficientGasReserve(BalanceContext),

    #[error("Insufficient balance: max withdrawable {}", .context.max_withdrawable)]
    InsufficientFunds {
        requested: Decimal,
        context: BalanceContext,
    },

    #[error("Submission failed during {stage}: {source}")]
    Submission {
        stage: SubmissionStage,
        tx_hash: Option<String>,
        context: BalanceContext,
        #[source]
        source: LedgerError,
    },
}

impl WithdrawalError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawalError::InvalidRequest(_) => "INVALID_REQUEST",
            WithdrawalError::AccountUnavailable(LedgerError::NotConfigured) => "NOT_CONFIGURED",
            WithdrawalError::AccountUnavailable(_) => "ACCOUNT_UNAVAILABLE",
            WithdrawalError::InsufficientGasReserve(_) => "INSUFFICIENT_GAS_RESERVE",
            WithdrawalError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WithdrawalError::Submission { .. } => "SUBMISSION_FAILURE",
        }
    }

    /// Whether the caller (rather than the operator or the network) must fix it.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WithdrawalError::InvalidRequest(_)
                | WithdrawalError::InsufficientGasReserve(_)
                | WithdrawalError::InsufficientFunds { .. }
        )
    }

    /// Balance figures, when the failure happened after the balance read.
    pub fn balance_context(&self) -> Option<&BalanceContext> {
        match self {
            WithdrawalError::InsufficientGasReserve(ctx) => Some(ctx),
            WithdrawalError::InsufficientFunds { context, .. } => Some(context),
            WithdrawalError::Submission { context, .. } => Some(context),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
