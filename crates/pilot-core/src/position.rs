//! Local replica of an exchange position.
//!
//! The exchange is authoritative for position state. This row is a cache
//! used for display and decision context; it must never be trusted over a
//! fresh exchange read for close sizing or duplicate detection.

use crate::{Price, Side, Symbol, Usd};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open leveraged position, as locally replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Asset symbol.
    pub symbol: Symbol,
    /// Position direction.
    pub side: Side,
    /// Margin committed, in USD.
    pub size_usd: Usd,
    /// Leverage multiplier.
    pub leverage: u32,
    /// Average entry price.
    pub entry_price: Price,
    /// Last known mark price.
    pub current_price: Price,
    /// Stop-loss trigger price, if placed.
    pub stop_loss: Option<Price>,
    /// Take-profit trigger price, if placed.
    pub take_profit: Option<Price>,
    /// Estimated liquidation price.
    pub liquidation_price: Price,
    /// When the position was opened (or first seen, for backfilled rows).
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Economic exposure: margin x leverage.
    #[must_use]
    pub fn notional(&self) -> Usd {
        self.size_usd * Decimal::from(self.leverage)
    }

    /// Unrealized PnL at a given mark price.
    ///
    /// Returns `Usd::ZERO` when the entry price is zero (backfilled row
    /// with incomplete data).
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Price) -> Usd {
        let Some(move_pct) = mark.pct_from(self.entry_price) else {
            return Usd::ZERO;
        };
        self.notional() * (move_pct / Decimal::from(100)) * self.side.sign()
    }

    /// Age of the position relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_long() -> Position {
        Position {
            symbol: Symbol::new("BTC"),
            side: Side::Long,
            size_usd: Usd::new(dec!(1000)),
            leverage: 10,
            entry_price: Price::new(dec!(60000)),
            current_price: Price::new(dec!(60000)),
            stop_loss: Some(Price::new(dec!(58200))),
            take_profit: Some(Price::new(dec!(60480))),
            liquidation_price: Price::new(dec!(54600)),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_notional() {
        assert_eq!(sample_long().notional(), Usd::new(dec!(10000)));
    }

    #[test]
    fn test_unrealized_pnl_long() {
        let pos = sample_long();
        // +1% move on $10k notional = +$100
        let pnl = pos.unrealized_pnl(Price::new(dec!(60600)));
        assert_eq!(pnl, Usd::new(dec!(100)));
    }

    #[test]
    fn test_unrealized_pnl_short_inverts_sign() {
        let mut pos = sample_long();
        pos.side = Side::Short;
        let pnl = pos.unrealized_pnl(Price::new(dec!(60600)));
        assert_eq!(pnl, Usd::new(dec!(-100)));
    }

    #[test]
    fn test_unrealized_pnl_zero_entry() {
        let mut pos = sample_long();
        pos.entry_price = Price::ZERO;
        assert_eq!(pos.unrealized_pnl(Price::new(dec!(60000))), Usd::ZERO);
    }
}
