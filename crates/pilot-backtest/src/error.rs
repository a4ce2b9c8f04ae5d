//! Backtest error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run is {0}, operation not allowed")]
    InvalidState(String),

    #[error("Candle data error: {0}")]
    Candles(String),

    #[error("Snapshot version {found} is not supported (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type BacktestResult<T> = Result<T, BacktestError>;
