//! Strategy registry.
//!
//! Builds the fixed catalog of synthetic strategies from a static protocol
//! table. Each entry gets a boosted, leveraged annual yield and an expected
//! profit per execution derived from a fixed economic model. The catalog is
//! ranked by yield once at startup and that order is what the schedulers
//! rely on for their top-K picks.
//!
//! The model is synthetic: it keeps the shape of a yield computation but is
//! not derived from any market signal.

use tracing::debug;

use crate::config::EconomicsConfig;
use crate::types::Strategy;

/// Seconds in a 365-day year.
pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Base annual yield (percent) per protocol. Generation cycles through this
/// table in order.
pub const PROTOCOL_TABLE: &[(&str, f64)] = &[
    ("uniswap_v3", 45.8),
    ("sushiswap", 38.2),
    ("pancakeswap", 35.1),
    ("curve", 28.6),
    ("balancer", 32.1),
    ("gmx", 42.3),
    ("pendle", 38.9),
    ("convex", 25.4),
    ("yearn", 22.1),
    ("aave", 18.5),
    ("compound", 15.2),
    ("morpho", 19.8),
    ("eigenlayer", 35.6),
    ("lido", 12.4),
    ("rocketpool", 11.8),
    ("frax", 24.3),
    ("maker", 8.5),
    ("synthetix", 28.7),
    ("dydx", 31.2),
    ("perpetual", 29.4),
];

/// Inputs of the fixed economic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EconomicModel {
    pub boost: f64,
    pub leverage: f64,
    /// Native units.
    pub principal: f64,
    /// Monetary units per native unit.
    pub reference_price: f64,
}

impl Default for EconomicModel {
    fn default() -> Self {
        Self::from(&EconomicsConfig::default())
    }
}

impl From<&EconomicsConfig> for EconomicModel {
    fn from(cfg: &EconomicsConfig) -> Self {
        Self {
            boost: cfg.boost,
            leverage: cfg.leverage,
            principal: cfg.principal,
            reference_price: cfg.reference_price,
        }
    }
}

impl EconomicModel {
    /// Boosted, leveraged yield for a protocol base yield.
    pub fn annual_yield(&self, base_yield: f64) -> f64 {
        base_yield * self.boost * self.leverage
    }

    /// Expected profit of a single execution at the given annual yield.
    pub fn expected_profit(&self, annual_yield: f64) -> f64 {
        (annual_yield / SECONDS_PER_YEAR) * self.principal * self.reference_price / 1000.0
    }

    /// Profit of a pulse at the given yield fraction of the principal.
    pub fn pulse_profit(&self, fraction: f64) -> f64 {
        self.principal * fraction * self.reference_price
    }

    /// Convert monetary units back to native units.
    pub fn to_native(&self, monetary: f64) -> f64 {
        if self.reference_price > 0.0 {
            monetary / self.reference_price
        } else {
            0.0
        }
    }
}

/// Generate `count` strategies cycling through `table`, ranked by yield
/// descending. Equal yields keep their generation order.
pub fn generate(count: usize, table: &[(&'static str, f64)], model: &EconomicModel) -> Vec<Strategy> {
    if table.is_empty() {
        return Vec::new();
    }

    let mut strategies: Vec<Strategy> = (0..count)
        .map(|i| {
            let (protocol, base_yield) = table[i % table.len()];
            let annual_yield = model.annual_yield(base_yield);
            let id = (i + 1) as u32;
            Strategy {
                id,
                protocol,
                name: format!("{}-{}", protocol.to_uppercase(), id),
                annual_yield,
                expected_profit: model.expected_profit(annual_yield),
                execution_count: 0,
                cumulative_profit: 0.0,
                is_active: true,
                last_executed: None,
            }
        })
        .collect();

    // `sort_by` is stable.
    strategies.sort_by(|a, b| b.annual_yield.total_cmp(&a.annual_yield));

    debug!(count = strategies.len(), "Strategy catalog generated");
    strategies
}

/// Mean annual yield across the catalog (0 when empty).
pub fn average_yield(strategies: &[Strategy]) -> f64 {
    if strategies.is_empty() {
        return 0.0;
    }
    strategies.iter().map(|s| s.annual_yield).sum::<f64>() / strategies.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
