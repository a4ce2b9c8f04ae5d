//! Protective-price sanitization.
//!
//! Models sometimes return stop-loss/take-profit values as percentages
//! where absolute prices are expected, or on the wrong side of entry.
//! Every open passes through [`sanitize_protections`] before any order is
//! placed; the output is always a pair of plausible absolute prices.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use pilot_core::{Price, Side};

/// Default stop-loss distance from entry, percent.
pub const DEFAULT_STOP_LOSS_PCT: Decimal = dec!(3);

/// Default take-profit distance from entry, percent.
pub const DEFAULT_TAKE_PROFIT_PCT: Decimal = dec!(0.8);

/// A value below this fraction of the entry price cannot be an absolute
/// price for the same asset; treat it as a percentage.
const PERCENT_REINTERPRET_RATIO: Decimal = dec!(0.2);

/// Sanitized absolute protective prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveLevels {
    pub stop_loss: Price,
    pub take_profit: Price,
}

/// Turn model-supplied protective values into plausible absolute prices.
///
/// - a value implausibly small relative to entry is reinterpreted as a
///   percentage distance and converted
/// - a stop-loss on the wrong side of entry (or missing) becomes the 3%
///   conservative default
/// - a take-profit on the wrong side (or missing) becomes the 0.8% default
#[must_use]
pub fn sanitize_protections(
    entry: Price,
    side: Side,
    stop_loss: Option<Price>,
    take_profit: Option<Price>,
) -> ProtectiveLevels {
    let sign = side.sign();

    let stop_loss = stop_loss
        .map(|sl| reinterpret_if_percent(entry, sl, -sign))
        .filter(|sl| protects(entry, *sl, side, Protection::Stop))
        .unwrap_or_else(|| {
            let fallback = entry.with_pct_offset(-sign * DEFAULT_STOP_LOSS_PCT);
            warn!(%entry, ?side, "Stop-loss missing or on wrong side, using default");
            fallback
        });

    let take_profit = take_profit
        .map(|tp| reinterpret_if_percent(entry, tp, sign))
        .filter(|tp| protects(entry, *tp, side, Protection::Target))
        .unwrap_or_else(|| {
            let fallback = entry.with_pct_offset(sign * DEFAULT_TAKE_PROFIT_PCT);
            warn!(%entry, ?side, "Take-profit missing or on wrong side, using default");
            fallback
        });

    ProtectiveLevels {
        stop_loss,
        take_profit,
    }
}

#[derive(Clone, Copy)]
enum Protection {
    Stop,
    Target,
}

/// A small positive value next to a five-figure entry is a percentage,
/// not a price. `direction` is the percentage's sign when converting.
fn reinterpret_if_percent(entry: Price, value: Price, direction: Decimal) -> Price {
    if value.is_positive() && value.inner() < entry.inner() * PERCENT_REINTERPRET_RATIO {
        let converted = entry.with_pct_offset(direction * value.inner());
        warn!(%entry, %value, %converted, "Reinterpreting protective value as percentage");
        converted
    } else {
        value
    }
}

/// Whether `value` sits on the protective side of entry.
fn protects(entry: Price, value: Price, side: Side, kind: Protection) -> bool {
    if !value.is_positive() {
        return false;
    }
    match (side, kind) {
        (Side::Long, Protection::Stop) | (Side::Short, Protection::Target) => value < entry,
        (Side::Long, Protection::Target) | (Side::Short, Protection::Stop) => value > entry,
    }
}
