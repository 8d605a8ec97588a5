//! Declarative construction of stage graphs.
//!
//! A pipeline is declared as a list of [`StageSpec`]s — name, dependencies,
//! declared input/output keys, and the stage implementation — plus an
//! optional out-of-band [`RevisionLoop`]. [`GraphBuilder::compile`] validates
//! the declaration and produces an immutable [`StageGraph`](super::StageGraph);
//! nothing executes until validation has passed.

use std::sync::Arc;

use crate::stage::Stage;

/// Producer label used in diagnostics when a key is caller-supplied.
pub(crate) const SEED_LABEL: &str = "<seed>";

/// Upstream dependency declaration.
///
/// `required` documents whether the downstream stage can produce anything
/// useful when this upstream failed recoverably. Both flavors are ordering
/// edges; a recoverable upstream failure never blocks execution, it only
/// leaves keys absent.
#[derive(Clone, Debug)]
pub struct Dependency {
    pub on: String,
    pub required: bool,
}

/// Declared context input key with its presence policy.
#[derive(Clone, Debug)]
pub struct InputKey {
    pub key: String,
    pub required: bool,
}

/// Single stage declaration: identity, edges, key contract, implementation.
#[derive(Clone)]
pub struct StageSpec {
    pub(crate) name: String,
    pub(crate) depends_on: Vec<Dependency>,
    pub(crate) inputs: Vec<InputKey>,
    pub(crate) outputs: Vec<String>,
    pub(crate) stage: Arc<dyn Stage>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, stage: impl Stage + 'static) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stage: Arc::new(stage),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            on: upstream.into(),
            required: true,
        });
        self
    }

    #[must_use]
    pub fn depends_on_optional(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            on: upstream.into(),
            required: false,
        });
        self
    }

    /// Declare a required input key.
    #[must_use]
    pub fn reads(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputKey {
            key: key.into(),
            required: true,
        });
        self
    }

    /// Declare an optional input key; the stage falls back to a default when
    /// it is absent.
    #[must_use]
    pub fn reads_optional(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputKey {
            key: key.into(),
            required: false,
        });
        self
    }

    /// Declare an output key this stage owns.
    #[must_use]
    pub fn writes(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.depends_on
    }

    pub fn inputs(&self) -> &[InputKey] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub(crate) fn input_keys(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.key.clone()).collect()
    }

    pub(crate) fn stage(&self) -> Arc<dyn Stage> {
        Arc::clone(&self.stage)
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// The single sanctioned back-edge: from the review stage to the stage the
/// loop re-enters. Declared out-of-band so the forward graph stays acyclic;
/// the bound lives in engine configuration.
#[derive(Clone, Debug)]
pub struct RevisionLoop {
    /// Stage whose verdict drives the loop.
    pub review: String,
    /// First stage to re-run on a revise verdict.
    pub rerun_from: String,
    /// Output key of the review stage carrying `{"verdict": "accept"|"revise"}`.
    pub verdict_key: String,
}

/// Builder for a validated [`StageGraph`](super::StageGraph).
///
/// # Examples
///
/// ```rust,no_run
/// use reportweave::graph::{GraphBuilder, StageSpec};
/// # use reportweave::stage::{Stage, StageCtx, StageError, StageInput, StageUpdate};
/// # use async_trait::async_trait;
/// # struct Noop;
/// # #[async_trait]
/// # impl Stage for Noop {
/// #     async fn run(&self, _: StageInput, _: StageCtx) -> Result<StageUpdate, StageError> {
/// #         Ok(StageUpdate::new())
/// #     }
/// # }
///
/// let graph = GraphBuilder::new()
///     .with_seed_key("ticker")
///     .add_stage(StageSpec::new("fetch", Noop).reads("ticker").writes("records"))
///     .add_stage(StageSpec::new("publish", Noop).depends_on("fetch").reads("records"))
///     .compile()?;
/// # Ok::<(), reportweave::graph::GraphError>(())
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    pub(crate) stages: Vec<StageSpec>,
    pub(crate) seed_keys: Vec<String>,
    pub(crate) revision: Option<RevisionLoop>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Declare a key supplied by the caller at run start rather than
    /// produced by a stage.
    #[must_use]
    pub fn with_seed_key(mut self, key: impl Into<String>) -> Self {
        self.seed_keys.push(key.into());
        self
    }

    #[must_use]
    pub fn with_revision_loop(
        mut self,
        review: impl Into<String>,
        rerun_from: impl Into<String>,
        verdict_key: impl Into<String>,
    ) -> Self {
        self.revision = Some(RevisionLoop {
            review: review.into(),
            rerun_from: rerun_from.into(),
            verdict_key: verdict_key.into(),
        });
        self
    }
}
