#[macro_use]
extern crate proptest;

use proptest::prelude::{Just, Strategy, prop};
use rustc_hash::FxHashMap;
use serde_json::json;

use reportweave::context::ContextSnapshot;
use reportweave::engine::{Decision, ReviewVerdict, RevisionController};
use reportweave::errors::{ErrorEntry, ErrorKind};
use reportweave::summary::{RunOutcome, classify};

fn verdict_strategy() -> impl Strategy<Value = ReviewVerdict> {
    prop_oneof![Just(ReviewVerdict::Accept), Just(ReviewVerdict::Revise)]
}

proptest! {
    /// The controller never spends more than its budget, and only a Rerun
    /// decision moves the counter.
    #[test]
    fn prop_budget_is_never_exceeded(
        bound in 0u32..6,
        verdicts in prop::collection::vec(verdict_strategy(), 0..32),
    ) {
        let mut controller = RevisionController::new(bound);
        for verdict in verdicts {
            let before = controller.used();
            match controller.decide(verdict) {
                Decision::Rerun => prop_assert_eq!(controller.used(), before + 1),
                Decision::Accepted => prop_assert_eq!(controller.used(), before),
                Decision::Exhausted => {
                    prop_assert_eq!(controller.used(), before);
                    prop_assert_eq!(controller.used(), bound);
                }
            }
            prop_assert!(controller.used() <= bound);
        }
    }

    /// Classification is a pure function: same inputs, same verdict, and the
    /// outcome follows the fatal > degraded > complete precedence.
    #[test]
    fn prop_classification_is_pure_and_ordered(
        present in prop::collection::vec(prop::bool::ANY, 4),
        error_count in 0usize..4,
        has_fatal in prop::bool::ANY,
        revisions in 0u32..3,
    ) {
        let expected: Vec<String> = ["metrics", "valuation", "narrative", "document"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let values: FxHashMap<String, serde_json::Value> = expected
            .iter()
            .zip(&present)
            .filter(|&(_, &p)| p)
            .map(|(k, _)| (k.clone(), json!("v")))
            .collect();
        let errors: Vec<ErrorEntry> = (0..error_count)
            .map(|i| ErrorEntry::new("stage", ErrorKind::Provider, format!("e{i}")))
            .collect();
        let snapshot = ContextSnapshot {
            values,
            stage_order: Vec::new(),
            errors,
        };
        let fatal = has_fatal
            .then(|| ErrorEntry::new("stage", ErrorKind::Internal, "boom"));

        let first = classify(&snapshot, &expected, fatal.clone(), revisions);
        let second = classify(&snapshot, &expected, fatal, revisions);
        prop_assert_eq!(first.outcome, second.outcome);
        prop_assert_eq!(&first.missing_keys, &second.missing_keys);

        let all_present = present.iter().all(|&p| p);
        let expected_outcome = if has_fatal {
            RunOutcome::Failed
        } else if error_count > 0 || !all_present {
            RunOutcome::Degraded
        } else {
            RunOutcome::Complete
        };
        prop_assert_eq!(first.outcome, expected_outcome);
        prop_assert_eq!(first.revisions, revisions);
    }
}
