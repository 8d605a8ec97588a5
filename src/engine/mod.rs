//! Execution engine: plan walking, branch concurrency, the join barrier,
//! and the bounded revision loop.

mod executor;
mod revision;

pub use executor::{Engine, EngineConfig, EngineError};
pub use revision::{Decision, ReviewVerdict, RevisionController};
