//! Candle data and its source seam.

use std::collections::HashMap;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pilot_core::{Price, Symbol};

use crate::error::{BacktestError, BacktestResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Candle intervals the engine consumes: fine-grained simulation steps
/// plus hourly and four-hour context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M5,
    H1,
    H4,
}

impl Interval {
    #[must_use]
    pub fn secs(&self) -> i64 {
        match self {
            Interval::M5 => 300,
            Interval::H1 => 3600,
            Interval::H4 => 14400,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Interval::M5 => "5m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
        }
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
}

impl Candle {
    /// High-low range as a fraction of the open. Zero for a degenerate bar.
    #[must_use]
    pub fn range_pct(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        (self.high.inner() - self.low.inner()) / self.open.inner()
    }
}

/// Historical candle provider.
pub trait CandleSource: Send + Sync {
    fn candles(
        &self,
        symbol: Symbol,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, BacktestResult<Vec<Candle>>>;
}

/// In-memory candle source, used by tests and pre-loaded runs.
#[derive(Default)]
pub struct MemCandleSource {
    series: RwLock<HashMap<(Symbol, Interval), Vec<Candle>>>,
}

impl MemCandleSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: Symbol, interval: Interval, candles: Vec<Candle>) {
        self.series.write().insert((symbol, interval), candles);
    }
}

impl CandleSource for MemCandleSource {
    fn candles(
        &self,
        symbol: Symbol,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, BacktestResult<Vec<Candle>>> {
        Box::pin(async move {
            let series = self.series.read();
            let Some(all) = series.get(&(symbol.clone(), interval)) else {
                return Err(BacktestError::Candles(format!(
                    "no {} series for {symbol}",
                    interval.label()
                )));
            };
            Ok(all
                .iter()
                .filter(|c| c.open_time >= start && c.open_time < end)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_range_pct() {
        let candle = Candle {
            open_time: Utc::now(),
            open: Price::new(dec!(100)),
            high: Price::new(dec!(102)),
            low: Price::new(dec!(99)),
            close: Price::new(dec!(101)),
            volume: dec!(10),
        };
        assert_eq!(candle.range_pct(), dec!(0.03));
    }

    #[tokio::test]
    async fn test_mem_source_window_filter() {
        let source = MemCandleSource::new();
        let start = Utc::now();
        let btc = Symbol::new("BTC");
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle {
                open_time: start + Duration::seconds(300 * i),
                open: Price::new(dec!(100)),
                high: Price::new(dec!(100)),
                low: Price::new(dec!(100)),
                close: Price::new(dec!(100)),
                volume: dec!(1),
            })
            .collect();
        source.insert(btc.clone(), Interval::M5, candles);

        let window = source
            .candles(
                btc.clone(),
                Interval::M5,
                start + Duration::seconds(300),
                start + Duration::seconds(1200),
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 3);

        assert!(source
            .candles(btc, Interval::H1, start, start + Duration::days(1))
            .await
            .is_err());
    }
}
