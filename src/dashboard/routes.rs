//! Dashboard API route handlers.
//!
//! All endpoints return JSON with camelCase fields. State is shared via
//! `Arc<DashboardState>`; handlers only read the engine or call into the
//! withdrawal pipeline.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use crate::engine::{Engine, EntropyRandom, Projections, RandomSource};
use crate::ledger::{AccountRegistry, LedgerError};
use crate::types::{BalanceContext, SubmissionStage, WithdrawalError, WithdrawalReceipt};
use crate::withdrawal::WithdrawalPipeline;

/// Strategies returned by the live leaderboard.
pub const LIVE_STRATEGY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub engine: Arc<Engine>,
    pub pipeline: Arc<WithdrawalPipeline>,
    /// Shown while no signer is configured.
    pub treasury_address: Option<String>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl DashboardState {
    pub fn new(engine: Arc<Engine>, pipeline: Arc<WithdrawalPipeline>) -> Self {
        Self {
            engine,
            pipeline,
            treasury_address: None,
            rng: Mutex::new(Box::new(EntropyRandom::new())),
        }
    }

    pub fn with_treasury_address(mut self, address: Option<String>) -> Self {
        self.treasury_address = address;
        self
    }

    /// Replace the random source used by manual pulses.
    pub fn with_rng(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    fn registry(&self) -> &Arc<AccountRegistry> {
        self.pipeline.registry()
    }

    fn treasury(&self) -> Option<String> {
        self.registry()
            .address()
            .map(|a| a.to_checksum(None))
            .or_else(|| self.treasury_address.clone())
    }

    fn fee_recipient(&self) -> Option<String> {
        self.pipeline.policy().fee_recipient.map(|a| a.to_checksum(None))
    }

    /// Live balance of an already bound account, never binding one.
    async fn balance_view(&self) -> BalanceView {
        let min = self.pipeline.policy().min_gas_reserve;
        match self.registry().live_balance().await {
            Some(balance) => BalanceView {
                balance,
                available: true,
                can_trade: balance >= min,
            },
            None => BalanceView {
                balance: Decimal::ZERO,
                available: false,
                can_trade: false,
            },
        }
    }
}

struct BalanceView {
    balance: Decimal,
    available: bool,
    can_trade: bool,
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub name: &'static str,
    pub status: &'static str,
    pub current_tps: u64,
    pub target_tps: u32,
    pub total_trades: u64,
    pub total_earned: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub tps: u64,
    pub target: u32,
    pub trading: bool,
    pub strategies: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub trading: bool,
    pub current_tps: u64,
    pub target_tps: u32,
    pub peak_tps: u64,
    pub total_trades: u64,
    pub trades_per_hour: u64,
    pub total_earned: f64,
    pub hourly_earnings: f64,
    pub daily_earnings: f64,
    pub trade_earnings: f64,
    pub pulse_earnings: f64,
    pub withdrawn_value: f64,
    pub pulses_executed: u64,
    pub treasury_address: Option<String>,
    pub balance: Decimal,
    pub balance_available: bool,
    pub can_trade: bool,
    pub min_gas_reserve: Decimal,
    pub fee_recipient: Option<String>,
    pub principal: f64,
    pub strategy_count: usize,
    pub active_strategies: usize,
    pub uptime_secs: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsResponse {
    pub total_earned: f64,
    pub trade_earnings: f64,
    pub pulse_earnings: f64,
    pub withdrawn_value: f64,
    pub hourly_rate: f64,
    pub uptime_ms: u128,
    pub active: bool,
    pub balance: Decimal,
    pub balance_available: bool,
    pub can_withdraw: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    pub balance: Decimal,
    pub balance_value: f64,
    pub can_trade: bool,
    pub min_gas_reserve: Decimal,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStrategy {
    pub id: u32,
    pub name: String,
    pub protocol: &'static str,
    pub annual_yield: f64,
    pub pnl: f64,
    pub executions: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStrategiesResponse {
    pub strategies: Vec<LiveStrategy>,
    pub total_earned: f64,
    pub average_yield: f64,
    pub projected_hourly: f64,
    pub projected_daily: f64,
    pub current_tps: u64,
    pub target_tps: u32,
    pub peak_tps: u64,
    pub total_trades: u64,
    pub pulses_executed: u64,
    pub sorted_by: &'static str,
    pub trading: bool,
    pub fee_recipient: Option<String>,
    pub treasury_address: Option<String>,
    pub balance: Decimal,
    pub balance_available: bool,
    pub principal: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub principal: f64,
    pub profit: f64,
    pub profit_native: f64,
    pub pulses_executed: u64,
    pub current_tps: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<SubmissionStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(flatten)]
    pub context: Option<BalanceContext>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler failure rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    Withdrawal(WithdrawalError),
    Ledger(LedgerError),
    Internal(String),
}

impl From<WithdrawalError> for ApiError {
    fn from(e: WithdrawalError) -> Self {
        ApiError::Withdrawal(e)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Withdrawal(e) => {
                let status = if e.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                let (stage, tx_hash) = match &e {
                    WithdrawalError::Submission { stage, tx_hash, .. } => (Some(*stage), tx_hash.clone()),
                    _ => (None, None),
                };
                let body = ErrorBody {
                    success: false,
                    code: e.code(),
                    error: e.to_string(),
                    stage,
                    tx_hash,
                    context: e.balance_context().cloned(),
                };
                (status, body)
            }
            ApiError::Ledger(e) => {
                let code = match e {
                    LedgerError::NotConfigured => "NOT_CONFIGURED",
                    _ => "LEDGER_UNAVAILABLE",
                };
                let body = ErrorBody {
                    success: false,
                    code,
                    error: e.to_string(),
                    stage: None,
                    tx_hash: None,
                    context: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
            ApiError::Internal(message) => {
                let body = ErrorBody {
                    success: false,
                    code: "INTERNAL",
                    error: message,
                    stage: None,
                    tx_hash: None,
                    context: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let snap = state.engine.snapshot();
    Json(RootResponse {
        name: "CADENCE",
        status: if snap.active { "online" } else { "paused" },
        current_tps: snap.trades_per_second,
        target_tps: state.engine.settings().target_rate,
        total_trades: snap.total_trades,
        total_earned: snap.total_earned,
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snap = state.engine.snapshot();
    Json(HealthResponse {
        healthy: true,
        tps: snap.trades_per_second,
        target: state.engine.settings().target_rate,
        trading: snap.active,
        strategies: snap.strategy_count,
    })
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.engine.snapshot();
    let projections = Projections::compute(&snap, state.engine.uptime());
    let balance = state.balance_view().await;

    Json(StatusResponse {
        trading: snap.active,
        current_tps: snap.trades_per_second,
        target_tps: state.engine.settings().target_rate,
        peak_tps: snap.peak_tps,
        total_trades: snap.total_trades,
        trades_per_hour: projections.trades_per_hour,
        total_earned: snap.total_earned,
        hourly_earnings: projections.hourly_earnings,
        daily_earnings: projections.daily_earnings,
        trade_earnings: snap.trade_earned,
        pulse_earnings: snap.pulse_earned,
        withdrawn_value: snap.withdrawn_value,
        pulses_executed: snap.pulses_executed,
        treasury_address: state.treasury(),
        balance: balance.balance,
        balance_available: balance.available,
        can_trade: balance.can_trade,
        min_gas_reserve: state.pipeline.policy().min_gas_reserve,
        fee_recipient: state.fee_recipient(),
        principal: state.engine.settings().model.principal,
        strategy_count: snap.strategy_count,
        active_strategies: snap.active_strategies,
        uptime_secs: projections.uptime_secs,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /earnings
pub async fn get_earnings(State(state): State<AppState>) -> Json<EarningsResponse> {
    let snap = state.engine.snapshot();
    let uptime = state.engine.uptime();
    let projections = Projections::compute(&snap, uptime);
    let balance = state.balance_view().await;

    Json(EarningsResponse {
        total_earned: snap.total_earned,
        trade_earnings: snap.trade_earned,
        pulse_earnings: snap.pulse_earned,
        withdrawn_value: snap.withdrawn_value,
        hourly_rate: projections.hourly_earnings,
        uptime_ms: uptime.as_millis(),
        active: snap.active,
        balance: balance.balance,
        balance_available: balance.available,
        can_withdraw: balance.available && balance.balance > state.pipeline.policy().gas_reserve_buffer,
    })
}

/// GET /balance. Binds the treasury account if needed.
pub async fn get_balance(State(state): State<AppState>) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.registry().ensure_account().await?;
    let balance = match account.balance().await {
        Ok(balance) => balance,
        Err(e) => {
            state.registry().invalidate();
            return Err(e.into());
        }
    };
    let policy = state.pipeline.policy();

    Ok(Json(BalanceResponse {
        address: account.address().to_checksum(None),
        balance,
        balance_value: balance.to_f64().unwrap_or(0.0) * policy.reference_price,
        can_trade: balance >= policy.min_gas_reserve,
        min_gas_reserve: policy.min_gas_reserve,
        endpoint: account.endpoint().to_string(),
    }))
}

/// GET /api/apex/strategies/live
pub async fn get_live_strategies(State(state): State<AppState>) -> Json<LiveStrategiesResponse> {
    let snap = state.engine.snapshot();
    let projections = Projections::compute(&snap, state.engine.uptime());
    let balance = state.balance_view().await;

    let strategies = state
        .engine
        .top_by_profit(LIVE_STRATEGY_LIMIT)
        .into_iter()
        .map(|s| LiveStrategy {
            id: s.id,
            name: s.name,
            protocol: s.protocol,
            annual_yield: s.annual_yield,
            pnl: s.cumulative_profit,
            executions: s.execution_count,
            is_active: s.is_active,
        })
        .collect();

    Json(LiveStrategiesResponse {
        strategies,
        total_earned: snap.total_earned,
        average_yield: snap.average_yield,
        projected_hourly: projections.hourly_earnings,
        projected_daily: projections.daily_earnings,
        current_tps: snap.trades_per_second,
        target_tps: state.engine.settings().target_rate,
        peak_tps: snap.peak_tps,
        total_trades: snap.total_trades,
        pulses_executed: snap.pulses_executed,
        sorted_by: "pnl_desc",
        trading: snap.active,
        fee_recipient: state.fee_recipient(),
        treasury_address: state.treasury(),
        balance: balance.balance,
        balance_available: balance.available,
        principal: state.engine.settings().model.principal,
    })
}

/// POST /withdraw (and its aliases)
pub async fn withdraw(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<WithdrawalReceipt>, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        warn!(status = %rejection.status(), "Rejected withdrawal body");
        ApiError::from(WithdrawalError::InvalidRequest(rejection.body_text()))
    })?;
    let receipt = state.pipeline.withdraw_json(&body).await.map_err(|e| {
        warn!(code = e.code(), error = %e, "Withdrawal failed");
        ApiError::from(e)
    })?;
    Ok(Json(receipt))
}

/// POST /execute: one manual pulse.
pub async fn execute(State(state): State<AppState>) -> Result<Json<ExecuteResponse>, ApiError> {
    let report = {
        let mut rng = state.rng.lock().unwrap_or_else(PoisonError::into_inner);
        state.engine.trigger_pulse(rng.as_mut())
    }
    .ok_or_else(|| ApiError::Internal("pulse produced no profit".into()))?;

    Ok(Json(ExecuteResponse {
        success: true,
        principal: state.engine.settings().model.principal,
        profit: report.profit,
        profit_native: report.profit_native,
        pulses_executed: report.pulses_executed,
        current_tps: report.current_tps,
    }))
}
