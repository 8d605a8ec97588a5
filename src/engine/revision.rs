//! Bounded revision loop bookkeeping.
//!
//! The controller is deliberately dumb: it counts revise verdicts against a
//! fixed budget and answers "loop again, accept, or give up". Interpreting
//! the reviewer's output and acting on the decision is the executor's job.

use serde_json::Value;

/// Reviewer verdict, decoded from the review stage's output key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewVerdict {
    Accept,
    Revise,
}

impl ReviewVerdict {
    /// Decode a verdict from the review stage's output value.
    ///
    /// Accepted shapes: a bare string (`"accept"`) or an object with a
    /// `verdict` field (`{"verdict": "revise", ...}`). Anything else is
    /// `None`; the executor treats that as an accept and logs the mismatch.
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("verdict")?.as_str()?,
            _ => return None,
        };
        match text {
            "accept" => Some(ReviewVerdict::Accept),
            "revise" => Some(ReviewVerdict::Revise),
            _ => None,
        }
    }
}

/// What the executor should do after a review verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Verdict was accept: continue past the review stage.
    Accepted,
    /// Verdict was revise and budget remains: re-enter the loop segment.
    Rerun,
    /// Verdict was revise but the budget is spent: log and continue with the
    /// last draft.
    Exhausted,
}

/// Counter over the revision budget. One controller per run.
#[derive(Clone, Debug)]
pub struct RevisionController {
    bound: u32,
    used: u32,
}

impl RevisionController {
    pub fn new(bound: u32) -> Self {
        Self { bound, used: 0 }
    }

    /// Revisions consumed so far.
    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn decide(&mut self, verdict: ReviewVerdict) -> Decision {
        match verdict {
            ReviewVerdict::Accept => Decision::Accepted,
            ReviewVerdict::Revise if self.used < self.bound => {
                self.used += 1;
                Decision::Rerun
            }
            ReviewVerdict::Revise => Decision::Exhausted,
        }
    }
}
