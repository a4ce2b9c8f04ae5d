//! Process-local recent-trade memory.
//!
//! Sub-second fast path in front of the durable lock and ledger checks.
//! Cleared on process restart, which is acceptable because correctness is
//! still enforced by the lock manager and the trade-ledger cooldowns.
//! Injected rather than global so tests can reset it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use pilot_core::{Side, Symbol};

/// Default window for the in-memory duplicate guard.
pub const RECENT_TRADE_WINDOW_SECS: i64 = 60;

/// Last open time per symbol+side, for this process only.
#[derive(Default)]
pub struct RecentTradeCache {
    inner: Mutex<HashMap<(Symbol, Side), DateTime<Utc>>>,
}

impl RecentTradeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an open for this key just happened.
    pub fn mark(&self, symbol: &Symbol, side: Side, now: DateTime<Utc>) {
        self.inner.lock().insert((symbol.clone(), side), now);
    }

    /// True when the same symbol+side was opened inside the window.
    #[must_use]
    pub fn recently_opened(&self, symbol: &Symbol, side: Side, now: DateTime<Utc>) -> bool {
        self.inner
            .lock()
            .get(&(symbol.clone(), side))
            .is_some_and(|at| now - *at < Duration::seconds(RECENT_TRADE_WINDOW_SECS))
    }

    /// Forget a symbol entirely (both sides).
    pub fn clear_symbol(&self, symbol: &Symbol) {
        self.inner.lock().retain(|(s, _), _| s != symbol);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
