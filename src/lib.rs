//! # Reportweave: Stage-graph Orchestration for Report Pipelines
//!
//! Reportweave runs structured analytical report pipelines as a validated
//! stage graph: a shared prelude, concurrent branch chains, a join barrier,
//! a bounded revision loop, and a linear tail to the finish node. State is
//! one append-only context per run; failures are classified, logged, and
//! folded into a three-way run outcome instead of tearing the run down.
//!
//! ## Core Concepts
//!
//! - **Stages**: async units of work with declared input/output keys and a
//!   three-way outcome (update, recoverable failure, fatal failure)
//! - **Context**: per-run key/value state with an ordered execution trace
//!   and an append-only error log
//! - **Graph**: declarative topology, validated up front, compiled to an
//!   execution plan
//! - **Engine**: plan walker with branch concurrency and the revision loop
//! - **Summary**: pure classification into complete / degraded / failed
//!
//! ## Quick Start
//!
//! ```
//! use reportweave::engine::{Engine, EngineConfig};
//! use reportweave::graph::{GraphBuilder, StageSpec};
//! use reportweave::stage::{Stage, StageCtx, StageError, StageInput, StageUpdate};
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct Fetch;
//!
//! #[async_trait]
//! impl Stage for Fetch {
//!     async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
//!         let ticker = input.required_str("ticker")?;
//!         Ok(StageUpdate::new().with_value("records", json!({"ticker": ticker})))
//!     }
//! }
//!
//! struct Publish;
//!
//! #[async_trait]
//! impl Stage for Publish {
//!     async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
//!         let records = input.required("records")?;
//!         Ok(StageUpdate::new().with_value("document", json!(records.to_string())))
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let graph = GraphBuilder::new()
//!     .with_seed_key("ticker")
//!     .add_stage(StageSpec::new("fetch", Fetch).reads("ticker").writes("records"))
//!     .add_stage(
//!         StageSpec::new("publish", Publish)
//!             .depends_on("fetch")
//!             .reads("records")
//!             .writes("document"),
//!     )
//!     .compile()
//!     .unwrap();
//!
//! let engine = Engine::new(graph, EngineConfig::default());
//! let mut seed = rustc_hash::FxHashMap::default();
//! seed.insert("ticker".to_string(), json!("600000.SH"));
//! let report = engine.run(seed).await.unwrap();
//! assert_eq!(report.summary.outcome, reportweave::summary::RunOutcome::Complete);
//! # });
//! ```
//!
//! ## Module Guide
//!
//! - [`stage`] - Stage trait, input views, and the stage-level error contract
//! - [`context`] - Per-run shared state, ownership rules, and snapshots
//! - [`graph`] - Declarative graph building, validation, execution plans
//! - [`engine`] - Plan execution, branch concurrency, the revision loop
//! - [`summary`] - Run outcome classification
//! - [`pipeline`] - The shipped equity-research report pipeline
//! - [`settings`] - Environment-driven configuration
//! - [`telemetry`] - Tracing subscriber bootstrap for the CLI

pub mod cli;
pub mod context;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod pipeline;
pub mod settings;
pub mod stage;
pub mod summary;
pub mod telemetry;
