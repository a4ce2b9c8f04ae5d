//! Live trading pipeline.
//!
//! A scheduled tick walks each account through a fixed gauntlet before any
//! order reaches the exchange:
//!
//! 1. Circuit breaker gate (`pilot-breaker`)
//! 2. Per-account trading lock (`pilot-locks`)
//! 3. Reconciliation of the local replica against exchange truth
//! 4. Decision request to the external model
//! 5. Nine-step open validation (locks, exchange truth, caps, cooldowns)
//! 6. Protective-price sanitization
//! 7. Execution with persist-before-protect ordering
//! 8. Breaker bookkeeping and lock release
//!
//! Failures in one account never leak into another; the exchange position
//! list outranks the local replica for every correctness-affecting
//! decision.

pub mod control;
pub mod cooldown;
pub mod error;
pub mod execute;
pub mod reconcile;
pub mod sanitize;
pub mod validate;

pub use control::ControlLoop;
pub use cooldown::{RecentTradeCache, RECENT_TRADE_WINDOW_SECS};
pub use error::{EngineError, EngineResult};
pub use execute::{
    CloseOutcome, NoopNotifier, Notifier, OpenOutcome, OpenRequest, ProtectionVisibility,
    TradeExecutor,
};
pub use reconcile::{Reconciler, RECONCILE_GRACE_SECS};
pub use sanitize::{
    sanitize_protections, ProtectiveLevels, DEFAULT_STOP_LOSS_PCT, DEFAULT_TAKE_PROFIT_PCT,
};
pub use validate::{OpenRejection, OpenValidator, ValidatedOpen};
