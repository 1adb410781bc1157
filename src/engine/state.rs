//! Engine context: the strategy catalog and aggregate counters behind one lock.
//!
//! Every read-modify-write of the counters happens inside a single critical
//! section, so a trade's strategy mutation and its aggregate mutation are never
//! observed apart. Readers get consistent copies through `snapshot()`.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::AppConfig;
use crate::strategy::{self, EconomicModel, PROTOCOL_TABLE};
use crate::types::{AggregateState, Strategy};

/// Tunables of the synthetic schedulers.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub target_rate: u32,
    pub selection_window: usize,
    pub pulse_width: usize,
    /// Multiplier range applied to a strategy's expected profit per trade.
    pub variance: (f64, f64),
    /// Fraction-of-principal range for pulse profit.
    pub pulse_fraction: (f64, f64),
    pub model: EconomicModel,
    pub start_active: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            target_rate: 100,
            selection_window: 50,
            pulse_width: 50,
            variance: (0.8, 1.2),
            pulse_fraction: (0.002, 0.005),
            model: EconomicModel::default(),
            start_active: true,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            target_rate: cfg.engine.target_rate,
            selection_window: cfg.engine.selection_window,
            pulse_width: cfg.engine.pulse_width,
            model: EconomicModel::from(&cfg.economics),
            start_active: cfg.engine.start_active,
            ..Self::default()
        }
    }
}

/// Everything guarded by the engine lock.
pub(super) struct Book {
    pub(super) aggregate: AggregateState,
    pub(super) strategies: Vec<Strategy>,
}

/// Point-in-time copy of the aggregate counters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub active: bool,
    pub total_trades: u64,
    pub total_earned: f64,
    pub trade_earned: f64,
    pub pulse_earned: f64,
    pub withdrawn_value: f64,
    pub trades_per_second: u64,
    pub peak_tps: u64,
    pub current_window_trades: u64,
    pub pulses_executed: u64,
    pub strategy_count: usize,
    pub active_strategies: usize,
    pub average_yield: f64,
    pub started_at: DateTime<Utc>,
}

/// Shared execution context. Owned by the scheduler, read by queries,
/// written by the withdrawal pipeline only through `reconcile_withdrawal`.
pub struct Engine {
    book: Mutex<Book>,
    settings: EngineSettings,
    started: Instant,
}

impl Engine {
    pub fn new(settings: EngineSettings, strategies: Vec<Strategy>) -> Self {
        Self {
            book: Mutex::new(Book {
                aggregate: AggregateState::new(settings.start_active),
                strategies,
            }),
            settings,
            started: Instant::now(),
        }
    }

    /// Build the engine and its catalog from configuration.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let settings = EngineSettings::from(cfg);
        let strategies = strategy::generate(cfg.engine.strategy_count, PROTOCOL_TABLE, &settings.model);
        info!(
            strategies = strategies.len(),
            target_rate = settings.target_rate,
            principal = settings.model.principal,
            "Engine initialised"
        );
        Self::new(settings, strategies)
    }

    /// Lock the book. A panic in another holder does not wedge the engine.
    pub(super) fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.lock().aggregate.active
    }

    /// Pause or resume both schedulers. Observed on their next tick.
    pub fn set_active(&self, active: bool) {
        let mut book = self.lock();
        if book.aggregate.active != active {
            info!(active, "Engine activity changed");
        }
        book.aggregate.active = active;
    }

    /// Toggle a strategy's eligibility for trade selection. Returns false if
    /// the id is unknown.
    pub fn set_strategy_active(&self, id: u32, active: bool) -> bool {
        let mut book = self.lock();
        match book.strategies.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let book = self.lock();
        let agg = &book.aggregate;
        EngineSnapshot {
            active: agg.active,
            total_trades: agg.total_trades,
            total_earned: agg.total_earned,
            trade_earned: agg.trade_earned,
            pulse_earned: agg.pulse_earned,
            withdrawn_value: agg.withdrawn_value,
            trades_per_second: agg.trades_per_second,
            peak_tps: agg.peak_tps,
            current_window_trades: agg.current_window_trades,
            pulses_executed: agg.pulses_executed,
            strategy_count: book.strategies.len(),
            active_strategies: book.strategies.iter().filter(|s| s.is_active).count(),
            average_yield: strategy::average_yield(&book.strategies),
            started_at: agg.started_at,
        }
    }

    /// Copy of the catalog in rank (yield) order.
    pub fn strategies(&self) -> Vec<Strategy> {
        self.lock().strategies.clone()
    }

    /// The `limit` strategies with the highest cumulative profit. Sorts a
    /// copy; the ranked catalog is left as is.
    pub fn top_by_profit(&self, limit: usize) -> Vec<Strategy> {
        let mut strategies = self.strategies();
        strategies.sort_by(|a, b| b.cumulative_profit.total_cmp(&a.cumulative_profit));
        strategies.truncate(limit);
        strategies
    }

    /// Deduct a confirmed withdrawal's monetary value from total earned,
    /// clamped at zero. Returns the new total.
    pub fn reconcile_withdrawal(&self, value: f64) -> f64 {
        let mut book = self.lock();
        let agg = &mut book.aggregate;
        if value.is_finite() && value > 0.0 {
            let deducted = value.min(agg.total_earned);
            agg.total_earned -= deducted;
            agg.withdrawn_value += deducted;
        }
        agg.total_earned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
