//! Append-only trade ledger records.
//!
//! Every lifecycle event a position goes through is written here exactly
//! once, including synthetic entries reconciliation produces when a
//! position vanished on the exchange without a local close.

use crate::{Price, Side, Symbol, Usd};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of lifecycle event this ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    /// Position opened by the executor.
    Open,
    /// Position closed by the executor (decision, stop, or manual).
    Close,
    /// Synthetic close written by reconciliation when the exchange no
    /// longer reports the position.
    SyncClose,
    /// Market close forced because the stop-loss could not be confirmed.
    EmergencyClose,
}

impl TradeAction {
    /// True for any variant that ends a position's lifecycle.
    #[must_use]
    pub fn is_close(&self) -> bool {
        !matches!(self, TradeAction::Open)
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Open => write!(f, "OPEN"),
            TradeAction::Close => write!(f, "CLOSE"),
            TradeAction::SyncClose => write!(f, "SYNC_CLOSE"),
            TradeAction::EmergencyClose => write!(f, "EMERGENCY_CLOSE"),
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unique record id.
    pub id: String,
    /// Owning account.
    pub account_id: crate::AccountId,
    /// Asset symbol.
    pub symbol: Symbol,
    /// Position direction.
    pub side: Side,
    /// Lifecycle event kind.
    pub action: TradeAction,
    /// Fill (or best-available) price.
    pub price: Price,
    /// Margin size of the position, in USD.
    pub size_usd: Usd,
    /// Leverage multiplier.
    pub leverage: u32,
    /// Realized PnL for close-type actions. `None` for opens and for
    /// closes where no reliable figure was available.
    pub pnl: Option<Usd>,
    /// Free-form reason (decision reasoning, rejection label, emergency
    /// cause).
    pub reason: Option<String>,
    /// When the event was executed.
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Build a record with a fresh id and the given timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: crate::AccountId,
        symbol: Symbol,
        side: Side,
        action: TradeAction,
        price: Price,
        size_usd: Usd,
        leverage: u32,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            symbol,
            side,
            action,
            price,
            size_usd,
            leverage,
            pnl: None,
            reason: None,
            executed_at,
        }
    }

    #[must_use]
    pub fn with_pnl(mut self, pnl: Usd) -> Self {
        self.pnl = Some(pnl);
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
