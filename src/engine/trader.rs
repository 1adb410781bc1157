//! Trade scheduler tick.
//!
//! Each tick picks a strategy uniformly at random from the first
//! `selection_window` active entries of the yield-ranked catalog (a top-K
//! pick: higher-yield strategies are favoured, the tail is never reached
//! while K active entries exist), samples a profit around its expected value
//! and books it. No I/O happens here.

use chrono::Utc;
use tracing::trace;

use super::random::RandomSource;
use super::state::Engine;
use crate::types::TradeOutcome;

impl Engine {
    /// Execute one trade tick. Returns `None` when paused, when no strategy
    /// is active, or when the sampled profit is unusable; none of those
    /// touch any counter.
    pub fn execute_trade(&self, rng: &mut dyn RandomSource) -> Option<TradeOutcome> {
        let settings = self.settings();
        let mut book = self.lock();
        if !book.aggregate.active {
            return None;
        }

        let candidates: Vec<usize> = book
            .strategies
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active)
            .map(|(i, _)| i)
            .take(settings.selection_window)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let slot = candidates[rng.index(candidates.len())];
        let variance = rng.uniform(settings.variance.0, settings.variance.1);
        let profit = book.strategies[slot].expected_profit * variance;
        if !profit.is_finite() {
            return None;
        }

        let now = Utc::now();
        let strategy = &mut book.strategies[slot];
        strategy.record_execution(profit, now);
        let strategy_id = strategy.id;

        let agg = &mut book.aggregate;
        agg.total_trades += 1;
        agg.total_earned += profit;
        agg.trade_earned += profit;
        agg.current_window_trades += 1;

        trace!(strategy_id, profit, "Trade executed");
        Some(TradeOutcome { strategy_id, profit })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
