//! Run outcome classification.
//!
//! Classification is a pure function over the final context snapshot and the
//! graph's declared output keys. It never mutates the context and gives the
//! same answer no matter how many times it is applied, so callers are free to
//! re-derive the summary from a dumped snapshot offline.

use serde::Serialize;

use crate::context::ContextSnapshot;
use crate::errors::ErrorEntry;

/// Three-way classification of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage succeeded and every declared key is present.
    Complete,
    /// The run finished, but the error log is non-empty or declared keys are
    /// missing. The report exists and says which parts to distrust.
    Degraded,
    /// A fatal failure halted the run before the finish node.
    Failed,
}

impl RunOutcome {
    /// Process exit code for the CLI: 0 complete, 2 degraded, 3 failed.
    /// (1 is reserved for configuration errors before a run starts.)
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Complete => 0,
            RunOutcome::Degraded => 2,
            RunOutcome::Failed => 3,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunOutcome::Complete => "complete",
            RunOutcome::Degraded => "degraded",
            RunOutcome::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// Derived verdict on a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Revision-loop iterations actually consumed.
    pub revisions: u32,
    /// Declared output keys absent from the final context, in plan order.
    pub missing_keys: Vec<String>,
    /// The halting failure, when the outcome is [`RunOutcome::Failed`].
    pub fatal: Option<ErrorEntry>,
}

/// Everything a caller gets back from a run: the verdict plus the full final
/// context for rendering and offline inspection.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub snapshot: ContextSnapshot,
}

/// Classify a finished run.
///
/// `expected_keys` is the graph's declared outputs in plan order; keys the
/// caller seeded are not expected here. Precedence: a fatal entry always
/// yields `Failed`; otherwise any error-log entry or missing key yields
/// `Degraded`; otherwise `Complete`.
pub fn classify(
    snapshot: &ContextSnapshot,
    expected_keys: &[String],
    fatal: Option<ErrorEntry>,
    revisions: u32,
) -> RunSummary {
    let missing_keys: Vec<String> = expected_keys
        .iter()
        .filter(|k| !snapshot.contains_key(k))
        .cloned()
        .collect();

    let outcome = if fatal.is_some() {
        RunOutcome::Failed
    } else if !snapshot.errors.is_empty() || !missing_keys.is_empty() {
        RunOutcome::Degraded
    } else {
        RunOutcome::Complete
    };

    RunSummary {
        outcome,
        revisions,
        missing_keys,
        fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorEntry, ErrorKind};
    use rustc_hash::FxHashMap;
    use serde_json::json;

    fn snapshot(keys: &[&str], errors: Vec<ErrorEntry>) -> ContextSnapshot {
        let values: FxHashMap<String, serde_json::Value> = keys
            .iter()
            .map(|k| (k.to_string(), json!("v")))
            .collect();
        ContextSnapshot {
            values,
            stage_order: Vec::new(),
            errors,
        }
    }

    fn expected(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn clean_run_is_complete() {
        let snap = snapshot(&["metrics", "narrative"], Vec::new());
        let summary = classify(&snap, &expected(&["metrics", "narrative"]), None, 0);
        assert_eq!(summary.outcome, RunOutcome::Complete);
        assert!(summary.missing_keys.is_empty());
    }

    #[test]
    fn logged_error_downgrades_to_degraded() {
        let snap = snapshot(
            &["metrics", "narrative"],
            vec![ErrorEntry::new(
                "news_digest",
                ErrorKind::Provider,
                "outage",
            )],
        );
        let summary = classify(&snap, &expected(&["metrics", "narrative"]), None, 0);
        assert_eq!(summary.outcome, RunOutcome::Degraded);
    }

    #[test]
    fn missing_key_downgrades_even_without_errors() {
        let snap = snapshot(&["metrics"], Vec::new());
        let summary = classify(&snap, &expected(&["metrics", "narrative"]), None, 0);
        assert_eq!(summary.outcome, RunOutcome::Degraded);
        assert_eq!(summary.missing_keys, ["narrative"]);
    }

    #[test]
    fn fatal_wins_over_everything() {
        let snap = snapshot(&["metrics", "narrative"], Vec::new());
        let fatal = ErrorEntry::new("ingest_financials", ErrorKind::Provider, "unknown ticker");
        let summary = classify(
            &snap,
            &expected(&["metrics", "narrative"]),
            Some(fatal),
            0,
        );
        assert_eq!(summary.outcome, RunOutcome::Failed);
    }

    #[test]
    fn classification_is_idempotent() {
        let snap = snapshot(
            &["metrics"],
            vec![ErrorEntry::new("quant_metrics", ErrorKind::MissingInput, "missing_price")],
        );
        let exp = expected(&["metrics", "narrative"]);
        let first = classify(&snap, &exp, None, 1);
        let second = classify(&snap, &exp, None, 1);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.missing_keys, second.missing_keys);
    }

    #[test]
    fn exit_codes_map_to_outcomes() {
        assert_eq!(RunOutcome::Complete.exit_code(), 0);
        assert_eq!(RunOutcome::Degraded.exit_code(), 2);
        assert_eq!(RunOutcome::Failed.exit_code(), 3);
    }
}
