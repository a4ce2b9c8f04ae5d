//! The decision source trait and its types.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pilot_core::{AccountId, Position, Price, Symbol, Usd};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Decision source failure. Always counted against the circuit breaker,
/// never fatal to the tick.
#[derive(Debug, Error, Clone)]
pub enum DecisionError {
    #[error("Decision source unavailable: {0}")]
    Unavailable(String),

    #[error("Decision request timed out after {0}s")]
    Timeout(u64),

    #[error("Decision response was not valid JSON: {0}")]
    MalformedResponse(String),
}

pub type DecisionResult<T> = Result<T, DecisionError>;

/// Everything the model is shown for one account.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub account_id: AccountId,
    /// Total account value, USD.
    pub equity: Usd,
    /// Local position replicas, post-reconciliation.
    pub open_positions: Vec<Position>,
    /// Current mark prices for the tradable universe.
    pub prices: HashMap<Symbol, Price>,
}

/// A fully specified request to open a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenIntent {
    pub symbol: Symbol,
    /// Margin to commit, USD.
    pub size_usd: Usd,
    pub leverage: u32,
    /// Stop-loss as the model supplied it. May be an absolute price or a
    /// percentage; sanitization happens downstream.
    pub stop_loss: Option<Price>,
    /// Take-profit as supplied. Same caveat as `stop_loss`.
    pub take_profit: Option<Price>,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
}

/// The tagged outcome of one decision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// Do nothing this tick.
    Hold,
    OpenLong(OpenIntent),
    OpenShort(OpenIntent),
    /// Close the position on `symbol`.
    Close { symbol: Symbol },
}

impl Decision {
    /// Short label for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Hold => "HOLD",
            Decision::OpenLong(_) => "OPEN_LONG",
            Decision::OpenShort(_) => "OPEN_SHORT",
            Decision::Close { .. } => "CLOSE",
        }
    }
}

/// Upstream trading model.
pub trait DecisionSource: Send + Sync {
    fn request_decision(
        &self,
        context: DecisionContext,
    ) -> BoxFuture<'_, DecisionResult<Decision>>;
}

/// Arc wrapper for decision trait objects.
pub type DynDecisionSource = Arc<dyn DecisionSource>;

// ============================================================================
// Test double
// ============================================================================

/// Scripted source that pops pre-loaded outcomes in order. Once the script
/// is exhausted it returns `Hold`.
#[derive(Default)]
pub struct ScriptedDecisionSource {
    script: Mutex<VecDeque<DecisionResult<Decision>>>,
    contexts: Mutex<Vec<DecisionContext>>,
}

impl ScriptedDecisionSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: DecisionResult<Decision>) {
        self.script.lock().push_back(outcome);
    }

    /// Contexts received so far, for assertions.
    #[must_use]
    pub fn contexts(&self) -> Vec<DecisionContext> {
        self.contexts.lock().clone()
    }
}

impl DecisionSource for ScriptedDecisionSource {
    fn request_decision(
        &self,
        context: DecisionContext,
    ) -> BoxFuture<'_, DecisionResult<Decision>> {
        Box::pin(async move {
            self.contexts.lock().push(context);
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Ok(Decision::Hold))
        })
    }
}
