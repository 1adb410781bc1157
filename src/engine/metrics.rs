//! Metrics aggregator.
//!
//! Throughput is sampled over non-overlapping windows: at each window
//! boundary the open counter is copied into `trades_per_second`, the peak is
//! raised if needed, and the counter restarts from zero. There is no
//! smoothing. Rate projections are derived on demand from a snapshot and the
//! elapsed uptime.

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::state::{Engine, EngineSnapshot};

/// Below this uptime, rates are reported as zero.
const MIN_ELAPSED_HOURS: f64 = 1.0 / 3_600_000.0;

/// Result of closing one measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    pub trades_per_second: u64,
    pub peak_tps: u64,
}

impl Engine {
    /// Close the current window and open the next one.
    pub fn roll_window(&self) -> WindowSample {
        let mut book = self.lock();
        let agg = &mut book.aggregate;
        agg.trades_per_second = agg.current_window_trades;
        agg.peak_tps = agg.peak_tps.max(agg.current_window_trades);
        agg.current_window_trades = 0;
        agg.window_started_at = Utc::now();

        let sample = WindowSample {
            trades_per_second: agg.trades_per_second,
            peak_tps: agg.peak_tps,
        };
        debug!(tps = sample.trades_per_second, peak = sample.peak_tps, "Window closed");
        sample
    }
}

/// Uptime-normalised rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projections {
    pub uptime_secs: u64,
    pub trades_per_hour: u64,
    pub hourly_earnings: f64,
    pub daily_earnings: f64,
}

impl Projections {
    pub fn compute(snapshot: &EngineSnapshot, elapsed: Duration) -> Self {
        let hours = elapsed.as_secs_f64() / 3600.0;
        if hours < MIN_ELAPSED_HOURS {
            return Self {
                uptime_secs: elapsed.as_secs(),
                trades_per_hour: 0,
                hourly_earnings: 0.0,
                daily_earnings: 0.0,
            };
        }

        let hourly = snapshot.total_earned / hours;
        Self {
            uptime_secs: elapsed.as_secs(),
            trades_per_hour: (snapshot.total_trades as f64 / hours).round() as u64,
            hourly_earnings: hourly,
            daily_earnings: hourly * 24.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
