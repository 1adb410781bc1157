//! Pulse scheduler tick.
//!
//! A pulse books a lump profit of `principal × U(pulse_fraction) × price`,
//! spreads it evenly over the top `pulse_width` ranked strategies and adds
//! the whole amount to total earned. It is its own profit channel and never
//! counts as a trade execution.

use tracing::info;

use super::random::RandomSource;
use super::state::{Book, Engine};
use crate::types::PulseReport;

impl Engine {
    /// Timer-driven pulse. No-op while paused.
    pub fn run_pulse(&self, rng: &mut dyn RandomSource) -> Option<PulseReport> {
        let mut book = self.lock();
        if !book.aggregate.active {
            return None;
        }
        self.apply_pulse(&mut book, rng)
    }

    /// Ad-hoc pulse outside the schedule, regardless of the pause gate.
    pub fn trigger_pulse(&self, rng: &mut dyn RandomSource) -> Option<PulseReport> {
        let mut book = self.lock();
        self.apply_pulse(&mut book, rng)
    }

    fn apply_pulse(&self, book: &mut Book, rng: &mut dyn RandomSource) -> Option<PulseReport> {
        let settings = self.settings();
        let fraction = rng.uniform(settings.pulse_fraction.0, settings.pulse_fraction.1);
        let profit = settings.model.pulse_profit(fraction);
        if !profit.is_finite() || profit < 0.0 {
            return None;
        }

        let recipients = settings.pulse_width.min(book.strategies.len());
        if recipients > 0 {
            let share = profit / recipients as f64;
            for strategy in book.strategies.iter_mut().take(recipients) {
                strategy.cumulative_profit += share;
            }
        }

        let agg = &mut book.aggregate;
        agg.total_earned += profit;
        agg.pulse_earned += profit;
        agg.pulses_executed += 1;

        let report = PulseReport {
            profit,
            profit_native: settings.model.to_native(profit),
            recipients,
            pulses_executed: agg.pulses_executed,
            current_tps: agg.trades_per_second,
        };

        info!(
            profit = format!("${:.2}", profit),
            tps = report.current_tps,
            total = format!("${:.2}", agg.total_earned),
            pulses = report.pulses_executed,
            "Pulse"
        );
        Some(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
