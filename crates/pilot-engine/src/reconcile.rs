//! Local-replica reconciliation against exchange truth.
//!
//! The exchange position list is authoritative. Reconciliation runs at the
//! top of every account iteration and brings the local replica in line:
//! stale local rows become synthetic `SYNC_CLOSE` ledger entries, unknown
//! exchange positions are backfilled, and survivors get their mark price
//! refreshed. The caller must skip reconciliation entirely when the
//! exchange read failed; running it against an empty list would treat an
//! API outage as "no positions" and close everything.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use pilot_core::{AccountId, Position, TradeAction, TradeRecord};
use pilot_exchange::ExchangePosition;
use pilot_store::{PositionStore, TradeStore};

use crate::error::EngineResult;

/// A just-filled order may not be visible on the next position read.
/// Local rows younger than this are never removed.
pub const RECONCILE_GRACE_SECS: i64 = 180;

pub struct Reconciler {
    positions: Arc<dyn PositionStore>,
    trades: Arc<dyn TradeStore>,
}

impl Reconciler {
    pub fn new(positions: Arc<dyn PositionStore>, trades: Arc<dyn TradeStore>) -> Self {
        Self { positions, trades }
    }

    /// Reconcile one account's local replica against an authoritative
    /// exchange snapshot. Returns the post-reconciliation local rows.
    pub async fn reconcile(
        &self,
        account: &AccountId,
        exchange_positions: &[ExchangePosition],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Position>> {
        let local = self.positions.positions(account.clone()).await?;
        let exchange_symbols: HashSet<_> =
            exchange_positions.iter().map(|p| p.symbol.clone()).collect();
        let local_symbols: HashSet<_> = local.iter().map(|p| p.symbol.clone()).collect();

        // Local rows the exchange no longer reports.
        for position in &local {
            if exchange_symbols.contains(&position.symbol) {
                continue;
            }
            if now - position.opened_at < Duration::seconds(RECONCILE_GRACE_SECS) {
                // Possibly a fill the exchange has not surfaced yet.
                info!(
                    account = %account,
                    symbol = %position.symbol,
                    "Position absent from exchange but inside grace window, keeping"
                );
                continue;
            }

            let pnl = position.unrealized_pnl(position.current_price);
            let record = TradeRecord::new(
                account.clone(),
                position.symbol.clone(),
                position.side,
                TradeAction::SyncClose,
                position.current_price,
                position.size_usd,
                position.leverage,
                now,
            )
            .with_pnl(pnl)
            .with_reason("position_missing_on_exchange");

            warn!(
                account = %account,
                symbol = %position.symbol,
                pnl = %pnl,
                "Position vanished on exchange, writing SYNC_CLOSE"
            );
            self.trades.append_trade(record).await?;
            self.positions
                .delete_position(account.clone(), position.symbol.clone())
                .await?;
        }

        // Exchange positions with no local row.
        for remote in exchange_positions {
            if local_symbols.contains(&remote.symbol) {
                continue;
            }
            warn!(
                account = %account,
                symbol = %remote.symbol,
                "Untracked exchange position, backfilling without protections"
            );
            self.positions
                .put_position(account.clone(), backfill(remote, now))
                .await?;
        }

        // Survivors: refresh mark-derived fields from the exchange row.
        for remote in exchange_positions {
            let Some(local_row) = local.iter().find(|p| p.symbol == remote.symbol) else {
                continue;
            };
            let mut updated = local_row.clone();
            updated.current_price = remote.mark_price;
            updated.leverage = remote.leverage;
            updated.liquidation_price = remote.liquidation_price;
            self.positions
                .put_position(account.clone(), updated)
                .await?;
        }

        Ok(self.positions.positions(account.clone()).await?)
    }
}

/// Local row for an exchange position we never opened (or lost track of).
/// Protective levels are unknown; operators are warned at the call site.
fn backfill(remote: &ExchangePosition, now: DateTime<Utc>) -> Position {
    Position {
        symbol: remote.symbol.clone(),
        side: remote.side(),
        size_usd: remote.notional() / rust_decimal::Decimal::from(remote.leverage.max(1)),
        leverage: remote.leverage,
        entry_price: remote.entry_price,
        current_price: remote.mark_price,
        stop_loss: None,
        take_profit: None,
        liquidation_price: remote.liquidation_price,
        opened_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::{Price, Qty, Side, Symbol, Usd};
    use pilot_store::MemStore;
    use rust_decimal_macros::dec;

    fn acct() -> AccountId {
        AccountId::from("acct1")
    }

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    fn local_position(symbol: Symbol, opened_at: DateTime<Utc>) -> Position {
        Position {
            symbol,
            side: Side::Long,
            size_usd: Usd::new(dec!(1000)),
            leverage: 10,
            entry_price: Price::new(dec!(60000)),
            current_price: Price::new(dec!(60600)),
            stop_loss: Some(Price::new(dec!(58200))),
            take_profit: Some(Price::new(dec!(60480))),
            liquidation_price: Price::new(dec!(54600)),
            opened_at,
        }
    }

    fn remote_position(symbol: Symbol) -> ExchangePosition {
        ExchangePosition {
            symbol,
            signed_qty: Qty::new(dec!(0.1)),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(dec!(61000)),
            leverage: 10,
            liquidation_price: Price::new(dec!(54600)),
            unrealized_pnl: Usd::new(dec!(100)),
        }
    }

    fn reconciler(store: &Arc<MemStore>) -> Reconciler {
        Reconciler::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_young_local_row_survives_absence() {
        let store = Arc::new(MemStore::new());
        let now = Utc::now();
        store
            .put_position(acct(), local_position(btc(), now - Duration::seconds(30)))
            .await
            .unwrap();

        let after = reconciler(&store).reconcile(&acct(), &[], now).await.unwrap();

        assert_eq!(after.len(), 1);
        assert_eq!(store.trade_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_absent_row_becomes_sync_close() {
        let store = Arc::new(MemStore::new());
        let now = Utc::now();
        store
            .put_position(
                acct(),
                local_position(btc(), now - Duration::seconds(RECONCILE_GRACE_SECS + 1)),
            )
            .await
            .unwrap();

        let after = reconciler(&store).reconcile(&acct(), &[], now).await.unwrap();

        assert!(after.is_empty());
        let trades = store.all_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::SyncClose);
        // +1% on $10k notional at the last known mark.
        assert_eq!(trades[0].pnl, Some(Usd::new(dec!(100))));
    }

    #[tokio::test]
    async fn test_untracked_exchange_position_is_backfilled() {
        let store = Arc::new(MemStore::new());
        let now = Utc::now();

        let after = reconciler(&store)
            .reconcile(&acct(), &[remote_position(btc())], now)
            .await
            .unwrap();

        assert_eq!(after.len(), 1);
        let row = &after[0];
        assert_eq!(row.symbol, btc());
        assert_eq!(row.stop_loss, None);
        assert_eq!(row.take_profit, None);
        // notional 0.1 * 61000 = $6100, margin at 10x = $610.
        assert_eq!(row.size_usd, Usd::new(dec!(610)));
    }

    #[tokio::test]
    async fn test_survivor_mark_price_refreshed() {
        let store = Arc::new(MemStore::new());
        let now = Utc::now();
        store
            .put_position(acct(), local_position(btc(), now - Duration::seconds(600)))
            .await
            .unwrap();

        let after = reconciler(&store)
            .reconcile(&acct(), &[remote_position(btc())], now)
            .await
            .unwrap();

        assert_eq!(after.len(), 1);
        assert_eq!(after[0].current_price, Price::new(dec!(61000)));
        // Protective levels from the local row are preserved.
        assert_eq!(after[0].stop_loss, Some(Price::new(dec!(58200))));
        assert_eq!(store.trade_count(), 0);
    }
}
