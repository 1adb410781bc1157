//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the treasury signing key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Nothing sensitive has
//! a compiled-in default.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub economics: EconomicsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Trade executions per second.
    pub target_rate: u32,
    pub metrics_window_ms: u64,
    pub pulse_interval_secs: u64,
    pub strategy_count: usize,
    /// Trade candidates are drawn from the first N active strategies.
    pub selection_window: usize,
    /// Pulse profit is spread over the first N ranked strategies.
    pub pulse_width: usize,
    pub start_active: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_rate: 100,
            metrics_window_ms: 1_000,
            pulse_interval_secs: 5,
            strategy_count: 450,
            selection_window: 50,
            pulse_width: 50,
            start_active: true,
        }
    }
}

impl EngineConfig {
    /// Period between two trade ticks. A zero rate is treated as 1/s.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_rate.max(1)))
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.metrics_window_ms.max(1))
    }

    pub fn pulse_period(&self) -> Duration {
        Duration::from_secs(self.pulse_interval_secs.max(1))
    }
}

/// Parameters of the synthetic economic model.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EconomicsConfig {
    /// Principal in native units used by the profit formulas.
    pub principal: f64,
    /// Monetary value of one native unit.
    pub reference_price: f64,
    pub boost: f64,
    pub leverage: f64,
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            principal: 100.0,
            reference_price: 3450.0,
            boost: 2.8,
            leverage: 4.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Expected chain id of every endpoint.
    pub network_id: u64,
    /// JSON-RPC endpoints, tried in order.
    pub endpoints: Vec<String>,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    pub transfer_gas_limit: u64,
    /// Fee rate used when the endpoint cannot report one.
    pub fallback_gas_price_gwei: u64,
    /// Explorer link pattern. `{hash}` is replaced by the transaction hash;
    /// without the placeholder the hash is appended.
    pub explorer_tx_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            endpoints: Vec::new(),
            probe_timeout_secs: 5,
            request_timeout_secs: 15,
            confirmations: 1,
            confirmation_timeout_secs: 300,
            transfer_gas_limit: 21_000,
            fallback_gas_price_gwei: 25,
            explorer_tx_url: "https://etherscan.io/tx/{hash}".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn fallback_gas_price_wei(&self) -> u128 {
        u128::from(self.fallback_gas_price_gwei) * 1_000_000_000
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TreasuryConfig {
    /// Name of the env var holding the hex-encoded signing key.
    pub signer_key_env: String,
    /// Default withdrawal destination.
    pub fee_recipient: Option<String>,
    /// Address shown by status queries while no signer is bound.
    pub treasury_address: Option<String>,
    /// Balance below which the treasury cannot operate at all.
    pub min_gas_reserve: Decimal,
    /// Kept back from every withdrawal to pay for its own gas.
    pub gas_reserve_buffer: Decimal,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            signer_key_env: "TREASURY_PRIVATE_KEY".to_string(),
            fee_recipient: None,
            treasury_address: None,
            min_gas_reserve: dec!(0.01),
            gas_reserve_buffer: dec!(0.003),
        }
    }
}

impl TreasuryConfig {
    /// Resolve the signing key from the environment. Missing or empty
    /// variables yield `None`: the service runs without a treasury.
    pub fn signer_key(&self) -> Option<SecretString> {
        std::env::var(&self.signer_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3001,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.dashboard.port = port;
        }
        Ok(config)
    }
}
