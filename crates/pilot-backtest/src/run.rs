//! Backtest run lifecycle.
//!
//! A run is a long-lived resumable job: `running` until the candle series
//! is exhausted, then exactly one terminal write to `completed`, `failed`
//! or `cancelled`. Chunks for one run never overlap because each chunk is
//! scheduled only by its predecessor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use pilot_core::{Symbol, Usd};
use pilot_decision::DecisionSource;

use crate::candle::{BoxFuture, CandleSource, Interval};
use crate::cost::CostModel;
use crate::engine::{ChunkBudget, ChunkOutcome, SimulationEngine};
use crate::error::{BacktestError, BacktestResult};
use crate::snapshot::SimulationSnapshot;
use crate::stats::BacktestReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub symbol: Symbol,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Identifier of the decision model under test.
    pub model: String,
    pub initial_capital: Usd,
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BacktestStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BacktestStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub params: BacktestParams,
    pub status: BacktestStatus,
    pub error: Option<String>,
    pub report: Option<BacktestReport>,
    /// Encoded [`SimulationSnapshot`] carried between chunks.
    pub snapshot: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Run persistence seam.
pub trait RunStore: Send + Sync {
    fn run(&self, id: String) -> BoxFuture<'_, BacktestResult<Option<BacktestRun>>>;

    fn put_run(&self, run: BacktestRun) -> BoxFuture<'_, BacktestResult<()>>;

    fn delete_run(&self, id: String) -> BoxFuture<'_, BacktestResult<()>>;
}

/// In-memory run store.
#[derive(Default)]
pub struct MemRunStore {
    runs: DashMap<String, BacktestRun>,
}

impl MemRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemRunStore {
    fn run(&self, id: String) -> BoxFuture<'_, BacktestResult<Option<BacktestRun>>> {
        Box::pin(async move { Ok(self.runs.get(&id).map(|r| r.clone())) })
    }

    fn put_run(&self, run: BacktestRun) -> BoxFuture<'_, BacktestResult<()>> {
        Box::pin(async move {
            self.runs.insert(run.id.clone(), run);
            Ok(())
        })
    }

    fn delete_run(&self, id: String) -> BoxFuture<'_, BacktestResult<()>> {
        Box::pin(async move {
            self.runs.remove(&id);
            Ok(())
        })
    }
}

/// Starts, advances, cancels and deletes runs.
pub struct BacktestRunner {
    runs: Arc<dyn RunStore>,
    candles: Arc<dyn CandleSource>,
    decision_source: Arc<dyn DecisionSource>,
    cost: CostModel,
    budget: ChunkBudget,
}

impl BacktestRunner {
    pub fn new(
        runs: Arc<dyn RunStore>,
        candles: Arc<dyn CandleSource>,
        decision_source: Arc<dyn DecisionSource>,
        cost: CostModel,
        budget: ChunkBudget,
    ) -> Self {
        Self {
            runs,
            candles,
            decision_source,
            cost,
            budget,
        }
    }

    /// Validate candle coverage and create a `running` run.
    pub async fn start(&self, params: BacktestParams) -> BacktestResult<String> {
        // All three series must exist up front: simulation steps plus the
        // hourly/four-hour context the model is shown.
        for interval in [Interval::M5, Interval::H1, Interval::H4] {
            let series = self
                .candles
                .candles(params.symbol.clone(), interval, params.start, params.end)
                .await?;
            if series.is_empty() {
                return Err(BacktestError::Candles(format!(
                    "empty {} series for {} in the requested window",
                    interval.label(),
                    params.symbol
                )));
            }
        }

        let now = Utc::now();
        let snapshot = SimulationSnapshot::new(params.initial_capital);
        let run = BacktestRun {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            status: BacktestStatus::Running,
            error: None,
            report: None,
            snapshot: Some(snapshot.encode()?),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        let id = run.id.clone();
        info!(run_id = %id, "Backtest started");
        self.runs.put_run(run).await?;
        Ok(id)
    }

    /// Advance one chunk. Terminal states are written exactly once; a
    /// failed chunk marks the run `failed` with the error string instead
    /// of leaving it `running`.
    pub async fn advance(&self, run_id: &str) -> BacktestResult<BacktestStatus> {
        let Some(mut run) = self.runs.run(run_id.to_string()).await? else {
            return Err(BacktestError::RunNotFound(run_id.to_string()));
        };
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        // Cooperative cancellation, checked at chunk start.
        if run.cancel_requested {
            info!(run_id, "Backtest cancelled");
            run.status = BacktestStatus::Cancelled;
            run.updated_at = Utc::now();
            self.runs.put_run(run).await?;
            return Ok(BacktestStatus::Cancelled);
        }

        match self.advance_chunk(&mut run).await {
            Ok(status) => {
                run.updated_at = Utc::now();
                self.runs.put_run(run).await?;
                Ok(status)
            }
            Err(err) => {
                error!(run_id, %err, "Backtest chunk failed");
                run.status = BacktestStatus::Failed;
                run.error = Some(err.to_string());
                run.updated_at = Utc::now();
                self.runs.put_run(run).await?;
                Ok(BacktestStatus::Failed)
            }
        }
    }

    async fn advance_chunk(&self, run: &mut BacktestRun) -> BacktestResult<BacktestStatus> {
        let raw = run.snapshot.as_deref().ok_or_else(|| {
            BacktestError::Candles("run has no snapshot to resume from".to_string())
        })?;
        let snapshot = SimulationSnapshot::decode(raw)?;

        let candles = self
            .candles
            .candles(
                run.params.symbol.clone(),
                Interval::M5,
                run.params.start,
                run.params.end,
            )
            .await?;

        let engine = SimulationEngine::new(
            self.cost.clone(),
            self.decision_source.clone(),
            run.params.symbol.clone(),
            run.params.max_leverage,
            run.params.initial_capital,
        );

        match engine.run_chunk(&candles, snapshot, &self.budget).await? {
            ChunkOutcome::Continue(next) => {
                run.snapshot = Some(next.encode()?);
                Ok(BacktestStatus::Running)
            }
            ChunkOutcome::Completed(report) => {
                run.status = BacktestStatus::Completed;
                run.report = Some(*report);
                run.snapshot = None;
                Ok(BacktestStatus::Completed)
            }
        }
    }

    /// Request cancellation; the next chunk boundary honors it.
    pub async fn cancel(&self, run_id: &str) -> BacktestResult<()> {
        let Some(mut run) = self.runs.run(run_id.to_string()).await? else {
            return Err(BacktestError::RunNotFound(run_id.to_string()));
        };
        if run.status.is_terminal() {
            return Err(BacktestError::InvalidState(status_label(run.status)));
        }
        run.cancel_requested = true;
        run.updated_at = Utc::now();
        self.runs.put_run(run).await?;
        Ok(())
    }

    /// Delete a run. Rejected while it is still `running`.
    pub async fn delete(&self, run_id: &str) -> BacktestResult<()> {
        let Some(run) = self.runs.run(run_id.to_string()).await? else {
            return Err(BacktestError::RunNotFound(run_id.to_string()));
        };
        if run.status == BacktestStatus::Running {
            return Err(BacktestError::InvalidState("running".to_string()));
        }
        self.runs.delete_run(run_id.to_string()).await
    }

    /// Drive a run to its terminal state. Chunks are scheduled
    /// back-to-back, each by its predecessor.
    pub async fn run_to_completion(&self, run_id: &str) -> BacktestResult<BacktestRun> {
        loop {
            let status = self.advance(run_id).await?;
            if status.is_terminal() {
                break;
            }
        }
        self.runs
            .run(run_id.to_string())
            .await?
            .ok_or_else(|| BacktestError::RunNotFound(run_id.to_string()))
    }
}

fn status_label(status: BacktestStatus) -> String {
    match status {
        BacktestStatus::Running => "running",
        BacktestStatus::Completed => "completed",
        BacktestStatus::Failed => "failed",
        BacktestStatus::Cancelled => "cancelled",
    }
    .to_string()
}
