//! Periodic task lifecycle.
//!
//! Spawns the trade tick, the metrics window and the pulse as independent
//! tokio interval tasks sharing one `Engine`. The trade interval uses burst
//! catch-up, so a late tick is made up for and the long-run rate stays on
//! target. The pause gate lives in the engine; the cancellation token stops
//! the tasks for good.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::random::{EntropyRandom, RandomSource};
use super::state::Engine;
use crate::config::EngineConfig;

/// Periods of the three tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cadence {
    pub tick: Duration,
    pub window: Duration,
    pub pulse: Duration,
}

impl From<&EngineConfig> for Cadence {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            tick: cfg.tick_period(),
            window: cfg.metrics_window(),
            pulse: cfg.pulse_period(),
        }
    }
}

/// Handle over the running periodic tasks.
pub struct Scheduler {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start all tasks with entropy-seeded randomness.
    pub fn start(engine: Arc<Engine>, cadence: Cadence) -> Self {
        Self::start_with(engine, cadence, EntropyRandom::new)
    }

    /// Start all tasks, building each task's random source with `make_rng`.
    pub fn start_with<R, F>(engine: Arc<Engine>, cadence: Cadence, make_rng: F) -> Self
    where
        R: RandomSource + 'static,
        F: Fn() -> R,
    {
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        let trade_engine = Arc::clone(&engine);
        let mut trade_rng = make_rng();
        tasks.push(tokio::spawn(run_periodic(
            "trade",
            cadence.tick,
            MissedTickBehavior::Burst,
            shutdown.clone(),
            move || {
                trade_engine.execute_trade(&mut trade_rng);
            },
        )));

        let window_engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(run_periodic(
            "metrics",
            cadence.window,
            MissedTickBehavior::Skip,
            shutdown.clone(),
            move || {
                window_engine.roll_window();
            },
        )));

        let pulse_engine = Arc::clone(&engine);
        let mut pulse_rng = make_rng();
        tasks.push(tokio::spawn(run_periodic(
            "pulse",
            cadence.pulse,
            MissedTickBehavior::Skip,
            shutdown.clone(),
            move || {
                pulse_engine.run_pulse(&mut pulse_rng);
            },
        )));

        info!(
            tick_ms = cadence.tick.as_secs_f64() * 1000.0,
            window_ms = cadence.window.as_millis() as u64,
            pulse_secs = cadence.pulse.as_secs_f64(),
            "Scheduler started"
        );

        Self { shutdown, tasks }
    }

    /// Token observed by every task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel all tasks and wait for them to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

/// Run `job` every `period` until `shutdown` fires. A panicking job only
/// loses its own tick.
fn run_periodic<F>(
    name: &'static str,
    period: Duration,
    missed: MissedTickBehavior,
    shutdown: CancellationToken,
    mut job: F,
) -> impl Future<Output = ()> + Send
where
    F: FnMut() + Send + 'static,
{
    async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(missed);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if catch_unwind(AssertUnwindSafe(&mut job)).is_err() {
                        error!(task = name, "Periodic job panicked; continuing");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
