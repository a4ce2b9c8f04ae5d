//! Wire-free exchange data types.

use pilot_core::{Price, Qty, Side, Symbol, Usd};
use serde::{Deserialize, Serialize};

/// A position as the exchange reports it. Authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    /// Signed base quantity: positive = long, negative = short.
    pub signed_qty: Qty,
    pub entry_price: Price,
    pub mark_price: Price,
    pub leverage: u32,
    pub liquidation_price: Price,
    pub unrealized_pnl: Usd,
}

impl ExchangePosition {
    #[must_use]
    pub fn side(&self) -> Side {
        if self.signed_qty.inner().is_sign_negative() {
            Side::Short
        } else {
            Side::Long
        }
    }

    /// Absolute base quantity.
    #[must_use]
    pub fn size(&self) -> Qty {
        self.signed_qty.abs()
    }

    /// True when the exchange reports an economically real position.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.signed_qty.is_zero()
    }

    /// Notional exposure at the current mark.
    #[must_use]
    pub fn notional(&self) -> Usd {
        self.signed_qty.notional(self.mark_price)
    }
}

/// Resting order kinds the agent cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Entry,
    StopLoss,
    TakeProfit,
}

/// A resting order as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub kind: OrderKind,
    /// Side of the position the order belongs to.
    pub side: Side,
    pub qty: Qty,
    /// Trigger price for protective orders.
    pub trigger_price: Option<Price>,
}

/// Market entry request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Qty,
    pub leverage: u32,
}

/// Fill report for a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub price: Price,
    pub qty: Qty,
}

/// Acknowledgement for a resting-order placement.
///
/// An ack is a claim, not proof: the executor re-queries open orders to
/// verify the order is actually visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}
