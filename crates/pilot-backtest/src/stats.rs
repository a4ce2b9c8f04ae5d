//! Final statistics from running sums.
//!
//! Sharpe is computed from the running sum and sum-of-squares of per-trade
//! returns so the full return series never needs to be held in memory.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pilot_core::Usd;

use crate::snapshot::SimulationSnapshot;

/// Annualization factor: trading days per year.
const ANNUALIZATION_DAYS: f64 = 252.0;

/// Terminal results of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_capital: Usd,
    pub final_capital: Usd,
    pub total_pnl: Usd,
    pub total_trades: u32,
    pub wins: u32,
    pub win_rate_pct: f64,
    pub max_drawdown: Usd,
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: f64,
    pub fees_paid: Usd,
    pub funding_paid: Usd,
    pub liquidation_count: u32,
    pub ai_calls_used: u64,
}

/// Annualized Sharpe from running sums. Zero when fewer than two trades
/// exist or the return series has no variance.
#[must_use]
pub fn sharpe_ratio(return_sum: f64, return_sq_sum: f64, n: u32) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let n = f64::from(n);
    let mean = return_sum / n;
    let variance = (return_sq_sum / n - mean * mean).max(0.0);
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * ANNUALIZATION_DAYS.sqrt()
}

#[must_use]
pub fn win_rate_pct(wins: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(wins) / f64::from(total) * 100.0
}

/// Build the terminal report from a finished snapshot.
#[must_use]
pub fn finalize(snapshot: &SimulationSnapshot, initial_capital: Usd) -> BacktestReport {
    BacktestReport {
        initial_capital,
        final_capital: snapshot.capital,
        total_pnl: snapshot.capital - initial_capital,
        total_trades: snapshot.total_trades,
        wins: snapshot.wins,
        win_rate_pct: win_rate_pct(snapshot.wins, snapshot.total_trades),
        max_drawdown: snapshot.max_drawdown,
        max_drawdown_pct: snapshot.max_drawdown_pct,
        sharpe_ratio: sharpe_ratio(
            snapshot.return_sum,
            snapshot.return_sq_sum,
            snapshot.total_trades,
        ),
        fees_paid: snapshot.fees_paid,
        funding_paid: snapshot.funding_paid,
        liquidation_count: snapshot.liquidation_count,
        ai_calls_used: snapshot.ai_calls_used,
    }
}
