//! Core domain types for the pilot trading agent.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Qty`, `Usd`: precision-safe numeric types
//! - `Symbol`, `AccountId`, `Side`: identifiers and trading enums
//! - `Position`: local replica of an exchange position
//! - `TradeRecord`: append-only ledger entry
//! - `TradingLock`, `SymbolTradeLock`: time-boxed lease rows
//! - `CircuitBreakerState`: per-account breaker snapshot
//! - `TradeLimits`: the single resolution point for validator limits

pub mod breaker_state;
pub mod decimal;
pub mod error;
pub mod limits;
pub mod locks;
pub mod position;
pub mod trade;
pub mod types;

pub use breaker_state::{BreakerPhase, CircuitBreakerState};
pub use decimal::{Price, Qty, Usd};
pub use error::{CoreError, Result};
pub use limits::TradeLimits;
pub use locks::{SymbolTradeLock, TradingLock};
pub use position::Position;
pub use trade::{TradeAction, TradeRecord};
pub use types::{AccountId, Side, Symbol};
