//! Chunked, resumable backtest engine.
//!
//! A run simulates one symbol over a candle window against an external
//! decision source, with a cost model covering taker fees, tiered
//! slippage, hourly funding and forced liquidation. The mutable state of
//! a run travels between short-lived chunk invocations as a versioned
//! JSON snapshot; each chunk is bounded by an AI-call and a wall-clock
//! budget and checks for cancellation before it starts.
//!
//! This pipeline is independent of the live trading machinery: a run is
//! single-writer by construction (each chunk schedules its successor), so
//! none of the lock or circuit-breaker layers apply here.

pub mod candle;
pub mod cost;
pub mod engine;
pub mod error;
pub mod run;
pub mod snapshot;
pub mod stats;

pub use candle::{Candle, CandleSource, Interval, MemCandleSource};
pub use cost::CostModel;
pub use engine::{ChunkBudget, ChunkOutcome, SimulationEngine};
pub use error::{BacktestError, BacktestResult};
pub use run::{
    BacktestParams, BacktestRun, BacktestRunner, BacktestStatus, MemRunStore, RunStore,
};
pub use snapshot::{SimPosition, SimulationSnapshot, SNAPSHOT_VERSION};
pub use stats::{sharpe_ratio, win_rate_pct, BacktestReport};
