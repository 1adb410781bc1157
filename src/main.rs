//! CADENCE: synthetic execution backend with an on-chain treasury.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the engine and treasury, starts the schedulers and serves the
//! dashboard until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cadence::config;
use cadence::dashboard::{self, DashboardState};
use cadence::engine::{Cadence, Engine, Scheduler};
use cadence::ledger::{AccountRegistry, EndpointSelector, RpcConnector};
use cadence::withdrawal::{WithdrawalPipeline, WithdrawalPolicy};

const BANNER: &str = r#"
  ____    _    ____  _____ _   _  ____ _____
 / ___|  / \  |  _ \| ____| \ | |/ ___| ____|
| |     / _ \ | | | |  _| |  \| | |   |  _|
| |___ / ___ \| |_| | |___| |\  | |___| |___
 \____/_/   \_\____/|_____|_| \_|\____|_____|

  Fixed-rate execution engine with treasury withdrawals
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("CADENCE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");

    // -- Initialise components -------------------------------------------

    let engine = Arc::new(Engine::from_config(&cfg));

    let connector = Arc::new(RpcConnector::from(&cfg.ledger));
    let selector = EndpointSelector::from_config(&cfg.ledger, connector);
    if selector.endpoints().is_empty() {
        warn!(network_id = selector.network_id(), "No ledger endpoints configured");
    } else {
        info!(
            network_id = selector.network_id(),
            endpoints = selector.endpoints().len(),
            "Ledger endpoints loaded"
        );
    }
    let signer_key = cfg.treasury.signer_key();
    if signer_key.is_none() {
        warn!(
            env = %cfg.treasury.signer_key_env,
            "No treasury signing key configured; withdrawals are disabled"
        );
    }
    let registry = Arc::new(AccountRegistry::new(selector, signer_key, cfg.ledger.probe_timeout()));

    let policy = WithdrawalPolicy::from_config(&cfg)?;
    let pipeline = Arc::new(WithdrawalPipeline::new(Arc::clone(&engine), Arc::clone(&registry), policy));

    // Bind the treasury now if possible. Failure is not fatal: the next
    // withdrawal or balance query retries endpoint selection.
    if registry.is_configured() {
        if let Err(e) = registry.ensure_account().await {
            warn!(error = %e, "Treasury not bound at startup; will retry on demand");
        }
    }

    let treasury = registry
        .address()
        .map(|a| a.to_checksum(None))
        .or_else(|| cfg.treasury.treasury_address.clone());
    info!(
        target_rate = cfg.engine.target_rate,
        strategies = cfg.engine.strategy_count,
        principal = cfg.economics.principal,
        fee_recipient = ?cfg.treasury.fee_recipient,
        treasury = ?treasury,
        balance = ?registry.live_balance().await,
        "CADENCE starting up"
    );

    // -- Run -------------------------------------------------------------

    let scheduler = Scheduler::start(Arc::clone(&engine), Cadence::from(&cfg.engine));
    let shutdown = CancellationToken::new();

    let mut server = if cfg.dashboard.enabled {
        let state = Arc::new(
            DashboardState::new(Arc::clone(&engine), pipeline)
                .with_treasury_address(cfg.treasury.treasury_address.clone()),
        );
        let port = cfg.dashboard.port;
        let token = shutdown.clone();
        Some(tokio::spawn(async move { dashboard::serve(state, port, token).await }))
    } else {
        info!("Dashboard disabled");
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    let server_exited = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received.");
            None
        }
        outcome = wait_server(&mut server) => Some(outcome),
    };

    shutdown.cancel();
    scheduler.stop().await;

    let outcome = match (server_exited, server) {
        (Some(outcome), _) => Some(outcome),
        (None, Some(handle)) => Some(handle.await),
        (None, None) => None,
    };
    match outcome {
        Some(Ok(Err(e))) => error!(error = %e, "Dashboard server failed"),
        Some(Err(e)) => error!(error = %e, "Dashboard task ended abnormally"),
        _ => {}
    }

    let snap = engine.snapshot();
    info!(
        trades = snap.total_trades,
        pulses = snap.pulses_executed,
        peak_tps = snap.peak_tps,
        earned = format!("${:.2}", snap.total_earned),
        withdrawn = format!("${:.2}", snap.withdrawn_value),
        "CADENCE shut down cleanly."
    );

    Ok(())
}

/// Resolve when the dashboard task ends; never, if there is none.
async fn wait_server(
    server: &mut Option<JoinHandle<Result<()>>>,
) -> Result<Result<()>, tokio::task::JoinError> {
    match server {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cadence=info"));

    let json_logging = std::env::var("CADENCE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
