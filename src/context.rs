//! Shared run state for one pipeline execution.
//!
//! A [`RunContext`] is created empty at run start, populated monotonically by
//! stages, and handed off read-only (as a [`ContextSnapshot`]) once the graph
//! reaches its finish node. It holds three things:
//!
//! - **values**: key → JSON value map of every stage output,
//! - **stage_order**: the ordered trace of every execution attempt,
//! - **errors**: the append-only log of recoverable failures and notes.
//!
//! Invariants enforced here rather than trusted to stage authors:
//! keys are never deleted; a stage may only write keys it declared; an
//! existing key may be overwritten only by the stage that first produced it
//! (re-execution through the revision loop is the single sanctioned
//! overwrite path). The engine keeps the context behind one mutex, so trace
//! and error-log appends are atomic across concurrent branches.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::ErrorEntry;
use crate::stage::StageUpdate;

/// Owner recorded for keys supplied by the caller rather than a stage.
pub const SEED_OWNER: &str = "<seed>";

/// Mutable run state, owned exclusively by the execution engine.
#[derive(Clone, Debug, Default)]
pub struct RunContext {
    values: FxHashMap<String, Value>,
    owners: FxHashMap<String, String>,
    stage_order: Vec<String>,
    errors: Vec<ErrorEntry>,
}

/// Violation of the declared-key write discipline.
///
/// These are stage-authoring defects, not runtime conditions: the engine
/// surfaces them as fatal so they cannot silently corrupt a report.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ContextError {
    #[error("stage `{stage}` wrote undeclared key `{key}`")]
    #[diagnostic(
        code(reportweave::context::undeclared_write),
        help("Add the key to the stage's declared outputs, or stop writing it.")
    )]
    UndeclaredWrite { stage: String, key: String },

    #[error("stage `{stage}` overwrote key `{key}` owned by `{owner}`")]
    #[diagnostic(
        code(reportweave::context::foreign_overwrite),
        help("Only the producing stage may overwrite a key, and only via the revision loop.")
    )]
    ForeignOverwrite {
        stage: String,
        key: String,
        owner: String,
    },
}

impl RunContext {
    /// Create a context pre-populated with caller-supplied seed values
    /// (ticker, report date, ...). Seed keys are owned by [`SEED_OWNER`] and
    /// can never be overwritten by a stage.
    pub fn with_seed(seed: FxHashMap<String, Value>) -> Self {
        let owners = seed
            .keys()
            .map(|k| (k.clone(), SEED_OWNER.to_string()))
            .collect();
        Self {
            values: seed,
            owners,
            stage_order: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record an execution attempt in the trace. Called at invocation time,
    /// so repeated revision-loop attempts all appear.
    pub fn record_attempt(&mut self, stage: &str) {
        self.stage_order.push(stage.to_string());
    }

    /// Append to the error log. The log is never cleared.
    pub fn record_error(&mut self, entry: ErrorEntry) {
        tracing::debug!(stage = %entry.stage, kind = %entry.kind, "error recorded");
        self.errors.push(entry);
    }

    /// Merge a successful stage update under the declared-key discipline.
    ///
    /// Keys outside `declared_outputs` and overwrites of keys owned by
    /// another stage are rejected; degradation notes are appended to the
    /// error log attributed to `stage`.
    pub fn merge_update(
        &mut self,
        stage: &str,
        declared_outputs: &[String],
        update: StageUpdate,
    ) -> Result<(), ContextError> {
        for key in update.values.keys() {
            if !declared_outputs.iter().any(|o| o == key) {
                return Err(ContextError::UndeclaredWrite {
                    stage: stage.to_string(),
                    key: key.clone(),
                });
            }
            if let Some(owner) = self.owners.get(key)
                && owner != stage
            {
                return Err(ContextError::ForeignOverwrite {
                    stage: stage.to_string(),
                    key: key.clone(),
                    owner: owner.clone(),
                });
            }
        }

        // Sort keys so the merge order (and any tracing) is deterministic.
        let mut pairs: Vec<_> = update.values.into_iter().collect();
        pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in pairs {
            tracing::debug!(stage, key = %key, "context key written");
            self.owners.insert(key.clone(), stage.to_string());
            self.values.insert(key, value);
        }

        for (kind, message) in update.notes {
            self.record_error(ErrorEntry::new(stage, kind, message));
        }
        Ok(())
    }

    /// Clone the declared input keys of a stage into a restricted view.
    /// Absent keys are simply omitted; presence policy is the stage's
    /// concern via `required`/`optional`.
    pub fn project(&self, keys: &[String]) -> FxHashMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn stage_order(&self) -> &[String] {
        &self.stage_order
    }

    /// Number of times `stage` has been invoked so far in this run.
    pub fn attempts(&self, stage: &str) -> u32 {
        self.stage_order.iter().filter(|s| *s == stage).count() as u32
    }

    /// Immutable point-in-time copy for the summary, the renderer, and the
    /// optional offline dump.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            stage_order: self.stage_order.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Read-only copy of the run context at a point in time.
///
/// Serializes to a flat structure suitable for offline inspection
/// (`generate --dump`): keys/values, the execution trace, and the error log.
#[derive(Clone, Debug, Serialize)]
pub struct ContextSnapshot {
    pub values: FxHashMap<String, Value>,
    pub stage_order: Vec<String>,
    pub errors: Vec<ErrorEntry>,
}

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
