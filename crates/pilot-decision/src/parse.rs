//! Fail-closed parsing of decision payloads.
//!
//! Model responses are free-form JSON. Anything that does not parse into
//! an actionable, fully specified decision becomes [`Decision::Hold`];
//! a malformed payload must never turn into a trade.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use pilot_core::{Price, Symbol, Usd};

use crate::source::{Decision, OpenIntent};

const DEFAULT_LEVERAGE: u32 = 5;

/// Parse a raw decision payload.
///
/// Expected shape:
/// `{"action": "...", "symbol": ..., "sizeUsd": ..., "leverage": ...,
///   "stopLoss": ..., "takeProfit": ..., "confidence": ..., "reasoning": ...}`
///
/// Unknown actions, missing required fields, and non-positive sizes all
/// resolve to `Hold`.
#[must_use]
pub fn parse_decision(payload: &Value) -> Decision {
    let Some(action) = payload.get("action").and_then(Value::as_str) else {
        warn!("decision payload missing action, holding");
        return Decision::Hold;
    };

    match action.trim().to_ascii_uppercase().as_str() {
        "HOLD" => Decision::Hold,
        "CLOSE" => match parse_symbol(payload) {
            Some(symbol) => Decision::Close { symbol },
            None => {
                warn!("CLOSE decision without symbol, holding");
                Decision::Hold
            }
        },
        "OPEN_LONG" => parse_open(payload).map_or(Decision::Hold, Decision::OpenLong),
        "OPEN_SHORT" => parse_open(payload).map_or(Decision::Hold, Decision::OpenShort),
        other => {
            warn!(action = other, "unknown decision action, holding");
            Decision::Hold
        }
    }
}

fn parse_open(payload: &Value) -> Option<OpenIntent> {
    let Some(symbol) = parse_symbol(payload) else {
        warn!("open decision without symbol, holding");
        return None;
    };

    let size_usd = decimal_field(payload, "sizeUsd").map(Usd::new);
    let Some(size_usd) = size_usd.filter(|s| s.inner() > Decimal::ZERO) else {
        warn!(symbol = %symbol, "open decision without positive sizeUsd, holding");
        return None;
    };

    let leverage = payload
        .get("leverage")
        .and_then(Value::as_u64)
        .and_then(|l| u32::try_from(l).ok())
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_LEVERAGE);

    let confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let reasoning = payload
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Some(OpenIntent {
        symbol,
        size_usd,
        leverage,
        stop_loss: decimal_field(payload, "stopLoss").map(Price::new),
        take_profit: decimal_field(payload, "takeProfit").map(Price::new),
        confidence,
        reasoning,
    })
}

fn parse_symbol(payload: &Value) -> Option<Symbol> {
    payload
        .get("symbol")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::new)
}

/// Numbers arrive either as JSON numbers or as numeric strings.
fn decimal_field(payload: &Value, key: &str) -> Option<Decimal> {
    match payload.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parses_open_long() {
        let payload = json!({
            "action": "OPEN_LONG",
            "symbol": "btc",
            "sizeUsd": 1000,
            "leverage": 10,
            "stopLoss": 58200,
            "takeProfit": "60480",
            "confidence": 0.8,
            "reasoning": "breakout"
        });
        let Decision::OpenLong(intent) = parse_decision(&payload) else {
            panic!("expected OpenLong");
        };
        assert_eq!(intent.symbol, Symbol::new("BTC"));
        assert_eq!(intent.size_usd, Usd::new(dec!(1000)));
        assert_eq!(intent.leverage, 10);
        assert_eq!(intent.stop_loss, Some(Price::new(dec!(58200))));
        assert_eq!(intent.take_profit, Some(Price::new(dec!(60480))));
        assert_eq!(intent.reasoning, "breakout");
    }

    #[test]
    fn test_parses_close() {
        let payload = json!({"action": "close", "symbol": "ETH"});
        assert_eq!(
            parse_decision(&payload),
            Decision::Close {
                symbol: Symbol::new("ETH")
            }
        );
    }

    #[test]
    fn test_missing_action_holds() {
        assert_eq!(parse_decision(&json!({"symbol": "BTC"})), Decision::Hold);
    }

    #[test]
    fn test_unknown_action_holds() {
        assert_eq!(
            parse_decision(&json!({"action": "YOLO", "symbol": "BTC"})),
            Decision::Hold
        );
    }

    #[test]
    fn test_open_without_size_holds() {
        let payload = json!({"action": "OPEN_SHORT", "symbol": "BTC"});
        assert_eq!(parse_decision(&payload), Decision::Hold);
    }

    #[test]
    fn test_open_with_zero_size_holds() {
        let payload = json!({"action": "OPEN_LONG", "symbol": "BTC", "sizeUsd": 0});
        assert_eq!(parse_decision(&payload), Decision::Hold);
    }

    #[test]
    fn test_close_without_symbol_holds() {
        assert_eq!(parse_decision(&json!({"action": "CLOSE"})), Decision::Hold);
    }

    #[test]
    fn test_missing_leverage_defaults() {
        let payload = json!({"action": "OPEN_LONG", "symbol": "BTC", "sizeUsd": 500});
        let Decision::OpenLong(intent) = parse_decision(&payload) else {
            panic!("expected OpenLong");
        };
        assert_eq!(intent.leverage, DEFAULT_LEVERAGE);
        assert_eq!(intent.confidence, 0.0);
        assert_eq!(intent.stop_loss, None);
    }

    #[test]
    fn test_confidence_clamped() {
        let payload = json!({
            "action": "OPEN_LONG", "symbol": "BTC", "sizeUsd": 500, "confidence": 7.5
        });
        let Decision::OpenLong(intent) = parse_decision(&payload) else {
            panic!("expected OpenLong");
        };
        assert_eq!(intent.confidence, 1.0);
    }
}
