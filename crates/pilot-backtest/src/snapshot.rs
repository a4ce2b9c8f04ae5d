//! Versioned simulation snapshot.
//!
//! The full mutable state of a run, serialized between chunk invocations.
//! Decoding rejects unknown versions instead of guessing at field
//! meanings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pilot_core::{Price, Side, Symbol, Usd};

use crate::error::{BacktestError, BacktestResult};

pub const SNAPSHOT_VERSION: u32 = 1;

/// An open simulated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimPosition {
    pub symbol: Symbol,
    pub side: Side,
    /// Margin committed, USD.
    pub margin_usd: Usd,
    pub leverage: u32,
    pub entry_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    pub opened_at: DateTime<Utc>,
    /// Funding accrued so far, deducted at close.
    pub accrued_funding: Usd,
    /// Last whole-hour funding checkpoint.
    pub last_funding_at: DateTime<Utc>,
}

impl SimPosition {
    /// Economic exposure: margin x leverage.
    #[must_use]
    pub fn notional(&self) -> Usd {
        self.margin_usd * Decimal::from(self.leverage)
    }

    /// Base quantity at entry.
    #[must_use]
    pub fn qty(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.notional().inner() / self.entry_price.inner()
    }

    /// Unrealized PnL at a price.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Price) -> Usd {
        Usd::new((price.inner() - self.entry_price.inner()) * self.qty() * self.side.sign())
    }
}

/// Mutable per-run state carried between chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub version: u32,
    pub capital: Usd,
    pub peak_capital: Usd,
    pub max_drawdown: Usd,
    pub max_drawdown_pct: Decimal,
    pub fees_paid: Usd,
    pub funding_paid: Usd,
    pub wins: u32,
    pub total_trades: u32,
    pub liquidation_count: u32,
    /// Running sum of per-trade returns (pnl / margin), for Sharpe.
    pub return_sum: f64,
    /// Running sum of squared per-trade returns.
    pub return_sq_sum: f64,
    pub open_position: Option<SimPosition>,
    /// Index of the next step candle to process.
    pub cursor: usize,
    /// Decision-source calls consumed over the whole run.
    pub ai_calls_used: u64,
}

impl SimulationSnapshot {
    #[must_use]
    pub fn new(initial_capital: Usd) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            capital: initial_capital,
            peak_capital: initial_capital,
            max_drawdown: Usd::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            fees_paid: Usd::ZERO,
            funding_paid: Usd::ZERO,
            wins: 0,
            total_trades: 0,
            liquidation_count: 0,
            return_sum: 0.0,
            return_sq_sum: 0.0,
            open_position: None,
            cursor: 0,
            ai_calls_used: 0,
        }
    }

    pub fn encode(&self) -> BacktestResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> BacktestResult<Self> {
        let snapshot: Self = serde_json::from_str(raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(BacktestError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Track peak and drawdown after a capital change.
    pub fn update_drawdown(&mut self) {
        if self.capital > self.peak_capital {
            self.peak_capital = self.capital;
        }
        let drawdown = self.peak_capital - self.capital;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            if self.peak_capital.is_positive() {
                self.max_drawdown_pct =
                    drawdown.inner() / self.peak_capital.inner() * Decimal::from(100);
            }
        }
    }
}
