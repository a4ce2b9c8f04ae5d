//! Configuration and wiring for the pilot trading agent.
//!
//! This crate is the composition root: it loads [`AppConfig`], wires the
//! stores, locks, control loop and backtest runner together, and drives
//! the tick scheduler. The exchange client, decision source and candle
//! source are injected by the embedding binary or service layer.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AgentConfig, AppConfig, BacktestConfig};
pub use error::{AgentError, AgentResult};
