//! Graph validation and execution-plan derivation.
//!
//! [`GraphBuilder::compile`] turns the declarative stage list into an
//! immutable [`StageGraph`]. All structural constraints are checked here,
//! before anything runs: dependency resolution, acyclicity of the forward
//! graph, a single source and sink, at most one join node, linearity of the
//! pre-fork and post-join segments, unique ownership of output keys, and
//! producibility of every declared input key. A failed check is a
//! configuration error — the pipeline never starts.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::builder::{GraphBuilder, RevisionLoop, StageSpec};

/// Structural validation failure. Raised at construction time only.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph declares no stages")]
    #[diagnostic(code(reportweave::graph::empty))]
    NoStages,

    #[error("duplicate stage name `{name}`")]
    #[diagnostic(code(reportweave::graph::duplicate_stage))]
    DuplicateStage { name: String },

    #[error("stage `{stage}` depends on unknown stage `{dependency}`")]
    #[diagnostic(
        code(reportweave::graph::unknown_dependency),
        help("Every dependency must name a declared stage.")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle involving: {stages:?}")]
    #[diagnostic(
        code(reportweave::graph::cycle),
        help("The forward graph must be acyclic; the revision loop is declared out-of-band.")
    )]
    Cycle { stages: Vec<String> },

    #[error("graph must have exactly one source stage, found: {names:?}")]
    #[diagnostic(code(reportweave::graph::sources))]
    MultipleSources { names: Vec<String> },

    #[error("graph must have exactly one sink stage, found: {names:?}")]
    #[diagnostic(code(reportweave::graph::sinks))]
    MultipleSinks { names: Vec<String> },

    #[error("graph must have at most one join stage, found: {names:?}")]
    #[diagnostic(
        code(reportweave::graph::joins),
        help("Only the convergent stage may declare more than one dependency.")
    )]
    MultipleJoins { names: Vec<String> },

    #[error("stage `{stage}` breaks the prelude/branch/tail shape: {detail}")]
    #[diagnostic(code(reportweave::graph::shape))]
    UnsupportedShape { stage: String, detail: String },

    #[error("output key `{key}` is produced by both `{first}` and `{second}`")]
    #[diagnostic(
        code(reportweave::graph::duplicate_output),
        help("Each context key has exactly one owning stage.")
    )]
    DuplicateOutputKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("stage `{stage}` reads key `{key}` that no upstream stage produces")]
    #[diagnostic(
        code(reportweave::graph::unproduced_input),
        help("Declare the producing stage as a dependency, or mark the key as a seed key.")
    )]
    UnproducedInput { stage: String, key: String },

    #[error("revision loop references unknown stage `{name}`")]
    #[diagnostic(code(reportweave::graph::revision_stage))]
    UnknownRevisionStage { name: String },

    #[error("revision loop stage `{stage}` is not in the post-join segment")]
    #[diagnostic(
        code(reportweave::graph::revision_placement),
        help("The back-edge must not re-enter a concurrent branch.")
    )]
    BackEdgeOutsideTail { stage: String },

    #[error("revision loop runs backwards: `{rerun_from}` comes after `{review}`")]
    #[diagnostic(code(reportweave::graph::revision_order))]
    BackEdgeInverted { review: String, rerun_from: String },

    #[error("verdict key `{key}` is not a declared output of review stage `{stage}`")]
    #[diagnostic(code(reportweave::graph::verdict_key))]
    VerdictKeyUndeclared { stage: String, key: String },
}

/// Derived scheduling structure: a linear prelude, independent branch
/// chains, the join, and the linear tail to the finish node. Indices point
/// into the graph's stage list.
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    pub prelude: Vec<usize>,
    pub branches: Vec<Vec<usize>>,
    pub join: Option<usize>,
    pub tail: Vec<usize>,
}

/// Resolved revision loop: positions of the re-entry and review stages
/// within the tail.
#[derive(Clone, Debug)]
pub struct RevisionPlan {
    pub review: usize,
    pub rerun_from: usize,
    pub verdict_key: String,
    /// Index into `plan.tail` of the first looped stage.
    pub loop_start: usize,
    /// Index into `plan.tail` of the review stage.
    pub loop_end: usize,
}

/// Immutable, validated stage topology. Built once at startup; the engine
/// only reads it.
#[derive(Debug)]
pub struct StageGraph {
    specs: Vec<StageSpec>,
    index: FxHashMap<String, usize>,
    seed_keys: Vec<String>,
    plan: ExecutionPlan,
    revision: Option<RevisionPlan>,
}

impl GraphBuilder {
    /// Validate the declaration and produce an executable topology.
    pub fn compile(self) -> Result<StageGraph, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::NoStages);
        }

        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for (i, spec) in self.stages.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateStage {
                    name: spec.name.clone(),
                });
            }
        }

        let n = self.stages.len();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, spec) in self.stages.iter().enumerate() {
            for dep in &spec.depends_on {
                let Some(&d) = index.get(&dep.on) else {
                    return Err(GraphError::UnknownDependency {
                        stage: spec.name.clone(),
                        dependency: dep.on.clone(),
                    });
                };
                if !deps[i].contains(&d) {
                    deps[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        let topo = toposort(&self.stages, &deps, &dependents)?;

        let sources: Vec<usize> = (0..n).filter(|&i| deps[i].is_empty()).collect();
        if sources.len() != 1 {
            return Err(GraphError::MultipleSources {
                names: sources.iter().map(|&i| self.stages[i].name.clone()).collect(),
            });
        }
        let sinks: Vec<usize> = (0..n).filter(|&i| dependents[i].is_empty()).collect();
        if sinks.len() != 1 {
            return Err(GraphError::MultipleSinks {
                names: sinks.iter().map(|&i| self.stages[i].name.clone()).collect(),
            });
        }

        let joins: Vec<usize> = (0..n).filter(|&i| deps[i].len() >= 2).collect();
        if joins.len() > 1 {
            return Err(GraphError::MultipleJoins {
                names: joins.iter().map(|&i| self.stages[i].name.clone()).collect(),
            });
        }

        let plan = derive_plan(&self.stages, &deps, &dependents, &topo, joins.first().copied())?;
        let revision = resolve_revision(&self.stages, &index, &plan, self.revision)?;
        validate_keys(
            &self.stages,
            &deps,
            &topo,
            &self.seed_keys,
            revision.as_ref().map(|rev| rev.review),
        )?;

        Ok(StageGraph {
            specs: self.stages,
            index,
            seed_keys: self.seed_keys,
            plan,
            revision,
        })
    }
}

fn toposort(
    stages: &[StageSpec],
    deps: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, GraphError> {
    let n = stages.len();
    let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut order = Vec::with_capacity(n);
    let mut placed = vec![false; n];

    // Kahn's algorithm; ties broken by declaration order so the plan is
    // deterministic across runs.
    loop {
        let Some(next) = (0..n).find(|&i| !placed[i] && indegree[i] == 0) else {
            break;
        };
        placed[next] = true;
        order.push(next);
        for &t in &dependents[next] {
            indegree[t] -= 1;
        }
    }

    if order.len() < n {
        let remaining = (0..n)
            .filter(|&i| !placed[i])
            .map(|i| stages[i].name.clone())
            .collect();
        return Err(GraphError::Cycle { stages: remaining });
    }
    Ok(order)
}

fn derive_plan(
    stages: &[StageSpec],
    deps: &[Vec<usize>],
    dependents: &[Vec<usize>],
    topo: &[usize],
    join: Option<usize>,
) -> Result<ExecutionPlan, GraphError> {
    let Some(join) = join else {
        // Fully linear graph: everything is tail, validated as a chain.
        let tail: Vec<usize> = topo.to_vec();
        validate_chain(stages, deps, &tail, None)?;
        return Ok(ExecutionPlan {
            tail,
            ..ExecutionPlan::default()
        });
    };

    // For every ancestor of the join, the set of branch slots (positions
    // in the join's dependency list) it can reach. Exactly one slot =>
    // branch member; two or more => shared prelude.
    let join_deps: Vec<usize> = deps[join].clone();
    let mut reach: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); stages.len()];
    for &i in topo.iter().rev() {
        if let Some(slot) = join_deps.iter().position(|&d| d == i) {
            reach[i].insert(slot);
        }
        let downstream: Vec<usize> = dependents[i]
            .iter()
            .copied()
            .filter(|&t| t != join)
            .collect();
        for t in downstream {
            let extra: Vec<usize> = reach[t].iter().copied().collect();
            reach[i].extend(extra);
        }
    }

    let mut prelude = Vec::new();
    let mut branches: Vec<Vec<usize>> = join_deps.iter().map(|_| Vec::new()).collect();
    let mut tail = Vec::new();
    for &i in topo {
        if i == join {
            continue;
        }
        let mut slots: Vec<usize> = reach[i].iter().copied().collect();
        slots.sort_unstable();
        match slots.as_slice() {
            [] => tail.push(i),
            [slot] => branches[*slot].push(i),
            _ => prelude.push(i),
        }
    }

    // Prelude must be a chain and each branch must only look upstream at
    // the prelude or its own earlier stages.
    validate_chain(stages, deps, &prelude, None)?;
    let prelude_set: FxHashSet<usize> = prelude.iter().copied().collect();
    for branch in &branches {
        let mut seen: FxHashSet<usize> = prelude_set.clone();
        for &i in branch {
            for &d in &deps[i] {
                if !seen.contains(&d) {
                    return Err(GraphError::UnsupportedShape {
                        stage: stages[i].name.clone(),
                        detail: format!(
                            "depends on `{}` outside its own branch",
                            stages[d].name
                        ),
                    });
                }
            }
            seen.insert(i);
        }
    }
    validate_chain(stages, deps, &tail, Some(join))?;

    Ok(ExecutionPlan {
        prelude,
        branches,
        join: Some(join),
        tail,
    })
}

/// A segment where stages run strictly sequentially: each member depends on
/// exactly its predecessor (or on `head`, or on nothing for the first
/// element of an unheaded chain).
fn validate_chain(
    stages: &[StageSpec],
    deps: &[Vec<usize>],
    segment: &[usize],
    head: Option<usize>,
) -> Result<(), GraphError> {
    let mut prev = head;
    for &i in segment {
        let ok = match (deps[i].as_slice(), prev) {
            ([], None) => true,
            ([d], Some(p)) => *d == p,
            _ => false,
        };
        if !ok {
            return Err(GraphError::UnsupportedShape {
                stage: stages[i].name.clone(),
                detail: "segment stages must depend on exactly the preceding stage".to_string(),
            });
        }
        prev = Some(i);
    }
    Ok(())
}

fn validate_keys(
    stages: &[StageSpec],
    deps: &[Vec<usize>],
    topo: &[usize],
    seed_keys: &[String],
    review: Option<usize>,
) -> Result<(), GraphError> {
    let mut producer: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, spec) in stages.iter().enumerate() {
        for key in &spec.outputs {
            if seed_keys.iter().any(|s| s == key) {
                return Err(GraphError::DuplicateOutputKey {
                    key: key.clone(),
                    first: super::builder::SEED_LABEL.to_string(),
                    second: spec.name.clone(),
                });
            }
            if let Some(&first) = producer.get(key.as_str()) {
                return Err(GraphError::DuplicateOutputKey {
                    key: key.clone(),
                    first: stages[first].name.clone(),
                    second: spec.name.clone(),
                });
            }
            producer.insert(key, i);
        }
    }

    // Transitive ancestor sets, in topo order.
    let mut ancestors: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); stages.len()];
    for &i in topo {
        for &d in &deps[i] {
            let upstream: Vec<usize> = ancestors[d].iter().copied().collect();
            ancestors[i].extend(upstream);
            ancestors[i].insert(d);
        }
    }

    for (i, spec) in stages.iter().enumerate() {
        for input in &spec.inputs {
            if seed_keys.iter().any(|s| s == &input.key) {
                continue;
            }
            // Back-edge data flow: a revision target may optionally read
            // the review stage's output, which only exists on re-entry.
            let produced_upstream = producer.get(input.key.as_str()).is_some_and(|&p| {
                ancestors[i].contains(&p) || (!input.required && review == Some(p))
            });
            if !produced_upstream {
                return Err(GraphError::UnproducedInput {
                    stage: spec.name.clone(),
                    key: input.key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_revision(
    stages: &[StageSpec],
    index: &FxHashMap<String, usize>,
    plan: &ExecutionPlan,
    revision: Option<RevisionLoop>,
) -> Result<Option<RevisionPlan>, GraphError> {
    let Some(revision) = revision else {
        return Ok(None);
    };

    let lookup = |name: &str| -> Result<usize, GraphError> {
        index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownRevisionStage {
                name: name.to_string(),
            })
    };
    let review = lookup(&revision.review)?;
    let rerun_from = lookup(&revision.rerun_from)?;

    let tail_pos = |idx: usize, name: &str| -> Result<usize, GraphError> {
        plan.tail
            .iter()
            .position(|&t| t == idx)
            .ok_or_else(|| GraphError::BackEdgeOutsideTail {
                stage: name.to_string(),
            })
    };
    let loop_start = tail_pos(rerun_from, &revision.rerun_from)?;
    let loop_end = tail_pos(review, &revision.review)?;
    if loop_start > loop_end {
        return Err(GraphError::BackEdgeInverted {
            review: revision.review,
            rerun_from: revision.rerun_from,
        });
    }

    if !stages[review].outputs.iter().any(|o| o == &revision.verdict_key) {
        return Err(GraphError::VerdictKeyUndeclared {
            stage: revision.review,
            key: revision.verdict_key,
        });
    }

    Ok(Some(RevisionPlan {
        review,
        rerun_from,
        verdict_key: revision.verdict_key,
        loop_start,
        loop_end,
    }))
}

impl StageGraph {
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, idx: usize) -> &StageSpec {
        &self.specs[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn revision(&self) -> Option<&RevisionPlan> {
        self.revision.as_ref()
    }

    pub fn seed_keys(&self) -> &[String] {
        &self.seed_keys
    }

    /// Every declared output key, in plan order. The summary uses this to
    /// report sections that were expected but never produced.
    pub fn expected_keys(&self) -> Vec<String> {
        self.plan_order()
            .flat_map(|i| self.specs[i].outputs.iter().cloned())
            .collect()
    }

    /// Stage indices in scheduling order: prelude, branches, join, tail.
    pub fn plan_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.plan
            .prelude
            .iter()
            .copied()
            .chain(self.plan.branches.iter().flatten().copied())
            .chain(self.plan.join)
            .chain(self.plan.tail.iter().copied())
    }

    /// Human-readable topology dump for the `plan` command.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let fmt_stage = |i: usize| -> String {
            let spec = &self.specs[i];
            let reads: Vec<String> = spec
                .inputs
                .iter()
                .map(|k| {
                    if k.required {
                        k.key.clone()
                    } else {
                        format!("{}?", k.key)
                    }
                })
                .collect();
            format!(
                "  {}  reads[{}] writes[{}]",
                spec.name,
                reads.join(", "),
                spec.outputs.join(", ")
            )
        };

        if !self.seed_keys.is_empty() {
            out.push_str(&format!("seed keys: {}\n", self.seed_keys.join(", ")));
        }
        if !self.plan.prelude.is_empty() {
            out.push_str("prelude:\n");
            for &i in &self.plan.prelude {
                out.push_str(&fmt_stage(i));
                out.push('\n');
            }
        }
        for (b, branch) in self.plan.branches.iter().enumerate() {
            out.push_str(&format!("branch {}:\n", b + 1));
            for &i in branch {
                out.push_str(&fmt_stage(i));
                out.push('\n');
            }
        }
        if let Some(join) = self.plan.join {
            out.push_str("join:\n");
            out.push_str(&fmt_stage(join));
            out.push('\n');
        }
        if !self.plan.tail.is_empty() {
            out.push_str("tail:\n");
            for &i in &self.plan.tail {
                out.push_str(&fmt_stage(i));
                out.push('\n');
            }
        }
        if let Some(rev) = &self.revision {
            out.push_str(&format!(
                "back-edge: {} -> {} (verdict key `{}`)\n",
                self.specs[rev.review].name, self.specs[rev.rerun_from].name, rev.verdict_key
            ));
        }
        out
    }
}
