//! Simulation cost model: fees, slippage, funding, leverage caps.
//!
//! Slippage is tiered by order notional and scaled by a volatility
//! multiplier derived from the candle's range. Stops eat the full
//! adjusted slippage; take-profits half of it. The funding model uses a
//! fixed hourly rate per asset rather than historical funding data, a
//! documented simplification.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use pilot_core::{Price, Side, Symbol, Usd};

use crate::candle::Candle;

/// Candle range at which the volatility multiplier reaches its midpoint.
const REFERENCE_RANGE_PCT: Decimal = dec!(0.01);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Taker fee as a fraction of notional.
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,
    /// Extra fee charged on a forced liquidation, fraction of notional.
    #[serde(default = "default_liquidation_fee_rate")]
    pub liquidation_fee_rate: Decimal,
    /// Minimum equity as a fraction of notional before liquidation.
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: Decimal,
    /// Fixed hourly funding rate. Longs pay when positive.
    #[serde(default = "default_hourly_funding_rate")]
    pub hourly_funding_rate: Decimal,
    /// Per-asset funding overrides.
    #[serde(default)]
    pub funding_overrides: HashMap<Symbol, Decimal>,
    /// Slippage tiers: (notional ceiling, rate). Checked in order; the
    /// last tier's rate applies above every ceiling.
    #[serde(default = "default_slippage_tiers")]
    pub slippage_tiers: Vec<(Decimal, Decimal)>,
    /// Per-asset leverage caps.
    #[serde(default)]
    pub leverage_caps: HashMap<Symbol, u32>,
    /// Cap for assets without an override.
    #[serde(default = "default_leverage_cap")]
    pub default_leverage_cap: u32,
}

fn default_taker_fee_rate() -> Decimal {
    dec!(0.00045)
}

fn default_liquidation_fee_rate() -> Decimal {
    dec!(0.01)
}

fn default_maintenance_margin_rate() -> Decimal {
    dec!(0.005)
}

fn default_hourly_funding_rate() -> Decimal {
    dec!(0.0000125)
}

fn default_slippage_tiers() -> Vec<(Decimal, Decimal)> {
    vec![
        (dec!(10000), dec!(0.0005)),
        (dec!(50000), dec!(0.001)),
        (dec!(250000), dec!(0.002)),
        (Decimal::MAX, dec!(0.004)),
    ]
}

fn default_leverage_cap() -> u32 {
    20
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            taker_fee_rate: default_taker_fee_rate(),
            liquidation_fee_rate: default_liquidation_fee_rate(),
            maintenance_margin_rate: default_maintenance_margin_rate(),
            hourly_funding_rate: default_hourly_funding_rate(),
            funding_overrides: HashMap::new(),
            slippage_tiers: default_slippage_tiers(),
            leverage_caps: HashMap::new(),
            default_leverage_cap: default_leverage_cap(),
        }
    }
}

impl CostModel {
    /// Cost model with zero slippage, for tests isolating fee effects.
    #[must_use]
    pub fn frictionless_slippage(mut self) -> Self {
        self.slippage_tiers = vec![(Decimal::MAX, Decimal::ZERO)];
        self
    }

    #[must_use]
    pub fn taker_fee(&self, notional: Usd) -> Usd {
        Usd::new(notional.inner().abs() * self.taker_fee_rate)
    }

    #[must_use]
    pub fn liquidation_fee(&self, notional: Usd) -> Usd {
        Usd::new(notional.inner().abs() * self.liquidation_fee_rate)
    }

    /// Hourly funding payment for one position. Positive means the trader
    /// pays; the sign flips for shorts.
    #[must_use]
    pub fn hourly_funding(&self, symbol: &Symbol, notional: Usd, side: Side) -> Usd {
        let rate = self
            .funding_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.hourly_funding_rate);
        Usd::new(notional.inner().abs() * rate * side.sign())
    }

    #[must_use]
    pub fn clamp_leverage(&self, symbol: &Symbol, requested: u32) -> u32 {
        let cap = self
            .leverage_caps
            .get(symbol)
            .copied()
            .unwrap_or(self.default_leverage_cap);
        requested.clamp(1, cap)
    }

    /// Base slippage rate for an order of this notional.
    #[must_use]
    pub fn slippage_rate(&self, notional: Usd) -> Decimal {
        let notional = notional.inner().abs();
        for (ceiling, rate) in &self.slippage_tiers {
            if notional <= *ceiling {
                return *rate;
            }
        }
        self.slippage_tiers.last().map(|(_, r)| *r).unwrap_or_default()
    }

    /// Multiplier in [1, 3] scaling slippage with the candle's range.
    #[must_use]
    pub fn volatility_multiplier(&self, candle: &Candle) -> Decimal {
        (Decimal::ONE + candle.range_pct() / REFERENCE_RANGE_PCT)
            .clamp(Decimal::ONE, dec!(3))
    }

    /// Entry fill: market price moved against the trader by the full
    /// volatility-adjusted slippage.
    #[must_use]
    pub fn entry_fill(&self, price: Price, side: Side, notional: Usd, candle: &Candle) -> Price {
        self.slip(price, side, notional, candle, Decimal::ONE, SlipDirection::Adverse)
    }

    /// Stop fill: full slippage past the trigger, always adverse.
    #[must_use]
    pub fn stop_fill(&self, trigger: Price, side: Side, notional: Usd, candle: &Candle) -> Price {
        self.slip(trigger, side, notional, candle, Decimal::ONE, SlipDirection::Exit)
    }

    /// Take-profit fill: half slippage off the trigger.
    #[must_use]
    pub fn take_profit_fill(
        &self,
        trigger: Price,
        side: Side,
        notional: Usd,
        candle: &Candle,
    ) -> Price {
        self.slip(trigger, side, notional, candle, dec!(0.5), SlipDirection::Exit)
    }

    fn slip(
        &self,
        price: Price,
        side: Side,
        notional: Usd,
        candle: &Candle,
        factor: Decimal,
        direction: SlipDirection,
    ) -> Price {
        let rate = self.slippage_rate(notional) * self.volatility_multiplier(candle) * factor;
        // Entering long pays up; exiting long receives less. Shorts mirror.
        let sign = match direction {
            SlipDirection::Adverse => side.sign(),
            SlipDirection::Exit => -side.sign(),
        };
        Price::new(price.inner() * (Decimal::ONE + sign * rate))
    }
}

#[derive(Clone, Copy)]
enum SlipDirection {
    /// Entering: fill worse in the direction of the trade.
    Adverse,
    /// Exiting: fill worse against the direction of the trade.
    Exit,
}
