//! Engine error types.

use thiserror::Error;

use pilot_exchange::ExchangeError;
use pilot_locks::LockError;
use pilot_store::StoreError;

/// Infrastructure failure inside the live pipeline. Aborts the current
/// account's iteration; other accounts in the tick are unaffected.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

pub type EngineResult<T> = Result<T, EngineError>;
