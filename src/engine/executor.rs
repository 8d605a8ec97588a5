//! Plan-driven execution over a validated stage graph.
//!
//! The executor walks the [`ExecutionPlan`](crate::graph::ExecutionPlan) in
//! four phases: the prelude runs sequentially, each branch runs as its own
//! tokio task over the shared context, the join barrier waits for every
//! branch, and the tail runs sequentially with the bounded revision loop
//! applied to its review segment.
//!
//! Failure routing: a recoverable stage failure is appended to the error log
//! and the walk continues (within a branch the rest of that chain still
//! runs, with the failed stage's keys simply absent). A fatal failure stops
//! the failing chain immediately; sibling branches run to completion, and
//! the run halts at the join barrier instead of entering the tail.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::revision::{Decision, ReviewVerdict, RevisionController};
use crate::context::RunContext;
use crate::errors::{ErrorEntry, ErrorKind};
use crate::graph::StageGraph;
use crate::stage::{StageCtx, StageInput};
use crate::summary::{classify, RunReport};

/// Pre-run failures. Once a run has started, failures travel through the
/// error log and the outcome classification instead.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("seed key `{key}` was declared by the graph but not supplied")]
    #[diagnostic(
        code(reportweave::engine::missing_seed),
        help("Supply every seed key the graph declares when starting a run.")
    )]
    MissingSeed { key: String },

    #[error("seed key `{key}` is not declared by the graph")]
    #[diagnostic(code(reportweave::engine::unknown_seed))]
    UnknownSeed { key: String },

    #[error("branch task failed to complete")]
    #[diagnostic(
        code(reportweave::engine::branch_panic),
        help("A stage implementation panicked; stages must return StageError instead.")
    )]
    BranchPanic(#[from] tokio::task::JoinError),
}

/// Engine knobs. Collected from [`Settings`](crate::settings::Settings) by
/// the CLI; embedders set them directly.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Revision-loop budget: how many revise verdicts are honored per run.
    pub max_revisions: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_revisions: 1 }
    }
}

/// How a single stage execution ended, after merge.
#[derive(Clone, Debug)]
enum StageStatus {
    /// Update merged; notes (if any) are in the log.
    Completed,
    /// Recoverable failure logged; outputs absent.
    Recovered,
    /// Fatal failure; the chain must stop.
    Fatal(ErrorEntry),
}

/// Runs one pipeline execution at a time over an immutable graph.
///
/// The engine is cheap to clone around (`Arc` inside) and holds no per-run
/// state; everything about a run lives in its own [`RunContext`].
#[derive(Clone)]
pub struct Engine {
    graph: Arc<StageGraph>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(graph: StageGraph, config: EngineConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            config,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Execute the full plan and classify the result.
    ///
    /// Returns `Err` only for pre-run configuration problems or a panicking
    /// stage task; every in-run failure is reported through
    /// [`RunReport::summary`].
    #[instrument(skip_all, fields(stages = self.graph.len()))]
    pub async fn run(&self, seed: FxHashMap<String, Value>) -> Result<RunReport, EngineError> {
        for key in self.graph.seed_keys() {
            if !seed.contains_key(key) {
                return Err(EngineError::MissingSeed { key: key.clone() });
            }
        }
        for key in seed.keys() {
            if !self.graph.seed_keys().iter().any(|s| s == key) {
                return Err(EngineError::UnknownSeed { key: key.clone() });
            }
        }

        let ctx = Arc::new(Mutex::new(RunContext::with_seed(seed)));
        let plan = self.graph.plan();
        let mut fatal: Option<ErrorEntry> = None;
        let mut revisions = 0;

        for &idx in &plan.prelude {
            match execute(&self.graph, idx, &ctx).await {
                StageStatus::Fatal(entry) => {
                    fatal = Some(entry);
                    break;
                }
                _ => continue,
            }
        }

        if fatal.is_none() && !plan.branches.is_empty() {
            fatal = self.run_branches(&ctx).await?;
        }

        if fatal.is_none()
            && let Some(join) = plan.join
            && let StageStatus::Fatal(entry) = execute(&self.graph, join, &ctx).await
        {
            fatal = Some(entry);
        }

        if fatal.is_none() {
            (fatal, revisions) = self.run_tail(&ctx).await;
        }

        let snapshot = {
            let guard = ctx.lock().await;
            guard.snapshot()
        };
        let summary = classify(&snapshot, &self.graph.expected_keys(), fatal, revisions);
        info!(outcome = %summary.outcome, revisions, "run finished");
        Ok(RunReport { summary, snapshot })
    }

    /// Spawn one task per branch and wait for all of them at the join
    /// barrier. Returns the fatal entry from the earliest-declared branch
    /// that halted, if any.
    async fn run_branches(
        &self,
        ctx: &Arc<Mutex<RunContext>>,
    ) -> Result<Option<ErrorEntry>, EngineError> {
        let mut tasks: JoinSet<(usize, Option<ErrorEntry>)> = JoinSet::new();
        for (slot, branch) in self.graph.plan().branches.iter().enumerate() {
            let graph = Arc::clone(&self.graph);
            let ctx = Arc::clone(ctx);
            let chain = branch.clone();
            tasks.spawn(async move {
                for idx in chain {
                    if let StageStatus::Fatal(entry) = execute(&graph, idx, &ctx).await {
                        return (slot, Some(entry));
                    }
                }
                (slot, None)
            });
        }

        let mut fatals: Vec<(usize, ErrorEntry)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (slot, outcome) = joined?;
            if let Some(entry) = outcome {
                fatals.push((slot, entry));
            }
        }
        fatals.sort_by_key(|(slot, _)| *slot);
        Ok(fatals.into_iter().next().map(|(_, entry)| entry))
    }

    /// Walk the tail, re-entering the revision segment on revise verdicts
    /// until the controller's budget runs out.
    async fn run_tail(&self, ctx: &Arc<Mutex<RunContext>>) -> (Option<ErrorEntry>, u32) {
        let tail = &self.graph.plan().tail;
        let revision = self.graph.revision().cloned();
        let mut controller = RevisionController::new(self.config.max_revisions);
        let mut pos = 0;

        while pos < tail.len() {
            let idx = tail[pos];
            let status = execute(&self.graph, idx, ctx).await;
            if let StageStatus::Fatal(entry) = status {
                return (Some(entry), controller.used());
            }

            let Some(rev) = revision.as_ref().filter(|rev| pos == rev.loop_end) else {
                pos += 1;
                continue;
            };

            // A review stage that failed recoverably gets no say: the run is
            // already degraded, looping on a stale verdict would be worse.
            let verdict = if matches!(status, StageStatus::Completed) {
                self.read_verdict(ctx, &rev.verdict_key, idx).await
            } else {
                ReviewVerdict::Accept
            };

            match controller.decide(verdict) {
                Decision::Accepted => pos += 1,
                Decision::Rerun => {
                    info!(
                        review = self.graph.spec(idx).name(),
                        rerun_from = self.graph.spec(tail[rev.loop_start]).name(),
                        used = controller.used(),
                        "revise verdict, re-entering loop segment"
                    );
                    pos = rev.loop_start;
                }
                Decision::Exhausted => {
                    warn!(
                        review = self.graph.spec(idx).name(),
                        budget = self.config.max_revisions,
                        "revision budget exhausted, continuing with last draft"
                    );
                    let mut guard = ctx.lock().await;
                    guard.record_error(ErrorEntry::new(
                        self.graph.spec(idx).name(),
                        ErrorKind::ReviewBudgetExhausted,
                        format!(
                            "revise verdict after {} of {} allowed revisions",
                            controller.used(),
                            self.config.max_revisions
                        ),
                    ));
                    pos += 1;
                }
            }
        }
        (None, controller.used())
    }

    async fn read_verdict(
        &self,
        ctx: &Arc<Mutex<RunContext>>,
        verdict_key: &str,
        review_idx: usize,
    ) -> ReviewVerdict {
        let mut guard = ctx.lock().await;
        let value = guard.get(verdict_key).cloned();
        match value.as_ref().and_then(ReviewVerdict::from_value) {
            Some(verdict) => verdict,
            None => {
                guard.record_error(ErrorEntry::new(
                    self.graph.spec(review_idx).name(),
                    ErrorKind::SchemaInvalid,
                    format!("verdict key `{verdict_key}` missing or malformed, treating as accept"),
                ));
                ReviewVerdict::Accept
            }
        }
    }
}

/// Run one stage: project its declared inputs, invoke it, merge the result.
/// Context-discipline violations at merge time are promoted to fatal.
async fn execute(graph: &StageGraph, idx: usize, ctx: &Mutex<RunContext>) -> StageStatus {
    let spec = graph.spec(idx);
    let name = spec.name().to_string();

    let (input, attempt) = {
        let mut guard = ctx.lock().await;
        guard.record_attempt(&name);
        let attempt = guard.attempts(&name);
        (StageInput::new(guard.project(&spec.input_keys())), attempt)
    };

    debug!(stage = %name, attempt, "stage start");
    let result = spec.stage().run(input, StageCtx::new(&name, attempt)).await;

    match result {
        Ok(update) => {
            let mut guard = ctx.lock().await;
            match guard.merge_update(&name, spec.outputs(), update) {
                Ok(()) => {
                    debug!(stage = %name, attempt, "stage complete");
                    StageStatus::Completed
                }
                Err(violation) => {
                    let entry = ErrorEntry::new(&name, ErrorKind::Validation, violation.to_string());
                    guard.record_error(entry.clone());
                    warn!(stage = %name, %violation, "context discipline violation");
                    StageStatus::Fatal(entry)
                }
            }
        }
        Err(err) => {
            let fatal = err.is_fatal();
            let entry = err.into_entry(&name);
            let mut guard = ctx.lock().await;
            guard.record_error(entry.clone());
            if fatal {
                warn!(stage = %name, error = %entry, "fatal stage failure");
                StageStatus::Fatal(entry)
            } else {
                debug!(stage = %name, error = %entry, "recoverable stage failure");
                StageStatus::Recovered
            }
        }
    }
}
