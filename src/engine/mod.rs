//! Core engine: the synthetic trade/metrics/pulse loop.
//!
//! `state` owns the shared context; `trader`, `metrics` and `pulse` add the
//! per-period operations on it; `scheduler` drives them on timers.

pub mod state;
pub mod random;
pub mod trader;
pub mod metrics;
pub mod pulse;
pub mod scheduler;

pub use metrics::{Projections, WindowSample};
pub use random::{EntropyRandom, RandomSource, ScriptedRandom};
pub use scheduler::{Cadence, Scheduler};
pub use state::{Engine, EngineSettings, EngineSnapshot};
