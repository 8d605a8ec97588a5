//! Stage graph: declaration, validation, and the derived execution plan.
//!
//! The graph layer is purely structural. It knows nothing about running
//! stages; it answers "is this pipeline well-formed?" and "in what order and
//! grouping do stages execute?". The engine consumes the resulting
//! [`StageGraph`] read-only.
//!
//! Construction is two-phase, builder then compile:
//!
//! 1. [`GraphBuilder`] collects [`StageSpec`] declarations, seed keys, and
//!    an optional [`RevisionLoop`].
//! 2. [`GraphBuilder::compile`] validates the whole declaration and derives
//!    the [`ExecutionPlan`]: a sequential prelude, concurrent branch chains,
//!    the join barrier, and the sequential tail.

mod builder;
mod topology;

pub use builder::{Dependency, GraphBuilder, InputKey, RevisionLoop, StageSpec};
pub use topology::{ExecutionPlan, GraphError, RevisionPlan, StageGraph};
