//! Centralized pre-trade limit resolution.
//!
//! Historically these defaults were duplicated across call sites with
//! drifting fallback values (max positions appeared as both 3 and 5, the
//! minimum size floor as both $100 and $200). This struct is now the only
//! place they are defined; callers must resolve through it instead of
//! re-hardcoding.

use crate::Usd;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Validator limits, one resolution point for the whole workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLimits {
    /// Maximum open positions per account.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Maximum positions in the same direction per account.
    #[serde(default = "default_max_same_direction")]
    pub max_same_direction: usize,
    /// Absolute floor for the minimum position size.
    #[serde(default = "default_min_position_floor")]
    pub min_position_floor: Usd,
    /// Percent of account value below which a position is too small.
    #[serde(default = "default_min_position_account_pct")]
    pub min_position_account_pct: Decimal,
    /// Per-symbol cooldown after any trade, seconds.
    #[serde(default = "default_symbol_cooldown_secs")]
    pub symbol_cooldown_secs: u64,
    /// Ultra-short duplicate guard window, seconds.
    #[serde(default = "default_duplicate_guard_secs")]
    pub duplicate_guard_secs: u64,
}

fn default_max_open_positions() -> usize {
    3
}

fn default_max_same_direction() -> usize {
    2
}

fn default_min_position_floor() -> Usd {
    Usd::new(dec!(200))
}

fn default_min_position_account_pct() -> Decimal {
    dec!(10)
}

fn default_symbol_cooldown_secs() -> u64 {
    300
}

fn default_duplicate_guard_secs() -> u64 {
    60
}

impl Default for TradeLimits {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            max_same_direction: default_max_same_direction(),
            min_position_floor: default_min_position_floor(),
            min_position_account_pct: default_min_position_account_pct(),
            symbol_cooldown_secs: default_symbol_cooldown_secs(),
            duplicate_guard_secs: default_duplicate_guard_secs(),
        }
    }
}

impl TradeLimits {
    /// Minimum acceptable position size for an account:
    /// `min(floor, pct-of-equity)`. Dust positions below this cannot
    /// absorb fees.
    #[must_use]
    pub fn min_position_size(&self, account_value: Usd) -> Usd {
        let pct_based = account_value * (self.min_position_account_pct / Decimal::from(100));
        self.min_position_floor.min(pct_based)
    }

    #[must_use]
    pub fn symbol_cooldown(&self) -> Duration {
        Duration::from_secs(self.symbol_cooldown_secs)
    }

    #[must_use]
    pub fn duplicate_guard(&self) -> Duration {
        Duration::from_secs(self.duplicate_guard_secs)
    }
}
