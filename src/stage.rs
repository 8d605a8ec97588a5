//! Stage execution contract.
//!
//! A [`Stage`] is the unit of work the engine schedules: it receives a
//! read-only view of its declared input keys, does its work (usually by
//! calling an external collaborator), and returns either a set of produced
//! key/value pairs or a classified failure. Failure handling is explicit in
//! the type: [`StageError::Recoverable`] is logged and execution continues
//! with the stage's outputs absent; [`StageError::Fatal`] halts the run.
//!
//! Stages are stateless between runs. The same stage instance may execute
//! more than once within a run, but only through the engine's revision loop.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::errors::{ErrorEntry, ErrorKind};

/// Core trait implemented by every unit of work in the stage graph.
///
/// Implementations must not panic and must not return unclassified errors:
/// every failure is normalized to [`StageError`] before it reaches the
/// engine. Collaborator timeouts are the stage body's responsibility, not
/// the scheduler's.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use reportweave::stage::{Stage, StageCtx, StageError, StageInput, StageUpdate};
/// use serde_json::json;
///
/// struct Headline;
///
/// #[async_trait]
/// impl Stage for Headline {
///     async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
///         let ticker = input.required_str("ticker")?;
///         Ok(StageUpdate::new().with_value("headline", json!(format!("{ticker} deep dive"))))
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError>;
}

/// Execution metadata handed to a stage alongside its input view.
#[derive(Clone, Debug)]
pub struct StageCtx {
    /// Name of the stage being executed.
    pub stage: String,
    /// Execution attempt within this run, 1-based. Only the revision loop
    /// produces attempts greater than 1.
    pub attempt: u32,
}

impl StageCtx {
    pub fn new(stage: impl Into<String>, attempt: u32) -> Self {
        Self {
            stage: stage.into(),
            attempt,
        }
    }
}

/// Read-only view of the context restricted to a stage's declared inputs.
///
/// The engine populates the view from the shared context under the merge
/// lock; a stage can only observe keys it declared, which is what lets two
/// branches run concurrently without per-key locking.
#[derive(Clone, Debug, Default)]
pub struct StageInput {
    values: FxHashMap<String, Value>,
}

impl StageInput {
    pub fn new(values: FxHashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Fetch a required input. Absence is a recoverable failure for the
    /// calling stage, per the missing-key contract.
    pub fn required(&self, key: &str) -> Result<&Value, StageError> {
        self.values.get(key).ok_or_else(|| {
            StageError::recoverable(
                ErrorKind::MissingInput,
                format!("required input `{key}` was never produced upstream"),
            )
        })
    }

    /// Required input that must be a string.
    pub fn required_str(&self, key: &str) -> Result<&str, StageError> {
        self.required(key)?.as_str().ok_or_else(|| {
            StageError::recoverable(
                ErrorKind::SchemaInvalid,
                format!("input `{key}` is not a string"),
            )
        })
    }

    /// Fetch an optional input. Absence is legal; the stage falls back to
    /// its declared default.
    pub fn optional(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All visible key/value pairs, for stages (renderer, audit) whose job
    /// is to look at everything they declared.
    pub fn values(&self) -> &FxHashMap<String, Value> {
        &self.values
    }
}

/// Successful stage outcome: produced key/value pairs plus optional
/// degradation notes.
///
/// Notes let a stage succeed while flagging that it ran on partial inputs
/// (e.g. metrics computed without a price window). They land in the error
/// log like recoverable failures and downgrade the run to `Degraded`.
#[derive(Clone, Debug, Default)]
pub struct StageUpdate {
    pub values: FxHashMap<String, Value>,
    pub notes: Vec<(ErrorKind, String)>,
}

impl StageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_note(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.notes.push((kind, message.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.notes.is_empty()
    }
}

/// Classified stage failure.
///
/// The engine treats the two variants very differently: recoverable failures
/// become error-log entries and execution continues; a fatal failure aborts
/// the run at the next scheduling point.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum StageError {
    #[error("recoverable ({kind}): {message}")]
    #[diagnostic(
        code(reportweave::stage::recoverable),
        help("The failure was logged; downstream stages degrade gracefully.")
    )]
    Recoverable { kind: ErrorKind, message: String },

    #[error("fatal ({kind}): {message}")]
    #[diagnostic(
        code(reportweave::stage::fatal),
        help("Fatal failures halt the run; check the failing stage's inputs.")
    )]
    Fatal { kind: ErrorKind, message: String },
}

impl StageError {
    pub fn recoverable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Recoverable {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Convert into an error-log entry attributed to `stage`.
    pub fn into_entry(self, stage: &str) -> ErrorEntry {
        match self {
            Self::Recoverable { kind, message } | Self::Fatal { kind, message } => {
                ErrorEntry::new(stage, kind, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with(key: &str, value: Value) -> StageInput {
        let mut map = FxHashMap::default();
        map.insert(key.to_string(), value);
        StageInput::new(map)
    }

    #[test]
    fn missing_required_input_is_recoverable() {
        let input = StageInput::default();
        let err = input.required("financials").unwrap_err();
        assert!(!err.is_fatal());
        match err {
            StageError::Recoverable { kind, .. } => assert_eq!(kind, ErrorKind::MissingInput),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_optional_input_is_none() {
        let input = input_with("ticker", json!("600000.SH"));
        assert!(input.optional("price_window").is_none());
        assert_eq!(input.optional("ticker"), Some(&json!("600000.SH")));
    }

    #[test]
    fn non_string_required_str_is_schema_invalid() {
        let input = input_with("ticker", json!(42));
        match input.required_str("ticker").unwrap_err() {
            StageError::Recoverable { kind, .. } => assert_eq!(kind, ErrorKind::SchemaInvalid),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fatal_error_converts_to_entry() {
        let entry = StageError::fatal(ErrorKind::Provider, "unknown ticker")
            .into_entry("ingest_financials");
        assert_eq!(entry.stage, "ingest_financials");
        assert_eq!(entry.kind, ErrorKind::Provider);
    }
}
