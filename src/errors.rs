//! Error-log entries recorded into the run context.
//!
//! Recoverable stage failures are data, not control flow: they are appended
//! to the context's error log and execution continues. Fatal failures use the
//! same entry shape but additionally halt the run. The log is append-only and
//! ordered; the final [`crate::summary::RunSummary`] is derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a recorded failure or degradation note.
///
/// Kinds are deliberately coarse: they distinguish the handful of situations
/// downstream consumers react to (retryable outage vs. contract breach vs.
/// exhausted review budget), not every possible cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// External data or LLM collaborator failed (outage, rate limit, timeout).
    Provider,
    /// A collaborator needed by the stage was never configured.
    NotConfigured,
    /// A required input key was absent from the context.
    MissingInput,
    /// Generated content did not conform to its agreed schema.
    SchemaInvalid,
    /// A stage broke its declared-key contract at merge time.
    Validation,
    /// The review stage kept requesting revisions past the budget.
    ReviewBudgetExhausted,
    /// Anything the stage could not classify more precisely.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Provider => "provider",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::MissingInput => "missing_input",
            ErrorKind::SchemaInvalid => "schema_invalid",
            ErrorKind::Validation => "validation",
            ErrorKind::ReviewBudgetExhausted => "review_budget_exhausted",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

/// One entry in the run context's append-only error log.
///
/// Entries carry the producing stage's name so a degraded run can tell a
/// human exactly which sections of the report to distrust.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.kind, self.message)
    }
}
