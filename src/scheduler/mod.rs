//! Stepped scheduler: dependency-ordered, concurrent unit execution with an
//! atomic commit per step.
//!
//! A step is the unit of progress. All execution units read the same
//! start-of-step context; the unit DAG constrains *when* units run, never what
//! they see. Propagation partials are merged (disjoint by the partition
//! invariant), the frozen rule pipeline is folded over the candidate, and the
//! candidate commits as the next context. Any failure along the way aborts the
//! whole step and the previous context stays current.

mod plan;

pub use plan::{PlanError, StepPlan};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::context::Context;
use crate::graph::{Graph, NodeId};
use crate::rules::{PipelineSnapshot, RuleError};
use crate::units::{ExecutionUnit, UnitId};

/// Failures during a step. Every variant means the step did not commit.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    #[error("rule '{rule}' failed at step {step}")]
    #[diagnostic(
        code(neuroloom::scheduler::rule_application),
        help("The step was aborted; the previously committed context remains current.")
    )]
    RuleApplication {
        rule: String,
        step: u64,
        #[source]
        source: RuleError,
    },

    #[error("unit {unit} failed at step {step}: {reason}")]
    #[diagnostic(code(neuroloom::scheduler::unit_failure))]
    UnitFailure {
        unit: UnitId,
        step: u64,
        reason: String,
    },

    #[error("unit task panicked or was aborted")]
    #[diagnostic(code(neuroloom::scheduler::join))]
    Join(#[from] tokio::task::JoinError),

    #[error("step {step} cancelled before commit")]
    #[diagnostic(code(neuroloom::scheduler::cancelled))]
    Cancelled { step: u64 },
}

/// Handle for cooperative cancellation of in-flight steps.
#[derive(Clone, Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests that the current and all future steps abort before commit.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag so stepping can resume.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Executes steps over a validated [`StepPlan`].
///
/// The scheduler is stateless between steps: it consumes a start-of-step
/// context plus a pipeline snapshot and returns the committed successor. The
/// caller (normally [`Runtime`](crate::runtimes::Runtime)) owns lineage state.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<Graph>,
    plan: StepPlan,
    semaphore: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    /// Validates the unit set and builds the step plan.
    ///
    /// `concurrency_limit` bounds how many units of a level run at once.
    pub fn new(
        graph: Arc<Graph>,
        units: Vec<ExecutionUnit>,
        concurrency_limit: usize,
    ) -> Result<Self, PlanError> {
        let plan = StepPlan::new(&graph, units)?;
        Ok(Scheduler {
            graph,
            plan,
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn plan(&self) -> &StepPlan {
        &self.plan
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Executes one step and returns the committed successor context.
    ///
    /// Order within the step: propagation over topological levels, merge of
    /// disjoint unit partials, rule folding in pipeline order, commit with
    /// `step + 1`. The input context is never mutated.
    #[instrument(skip_all, fields(identity = %current.identity, step = current.step))]
    pub async fn step(
        &self,
        current: Arc<Context>,
        pipeline: PipelineSnapshot,
    ) -> Result<Context, StepError> {
        let step = current.step;
        if self.stop.load(Ordering::SeqCst) {
            return Err(StepError::Cancelled { step });
        }

        // Candidate starts from the full start-of-step activations: nodes
        // without inbound edges keep their values.
        let mut candidate = Context {
            identity: current.identity.clone(),
            step: step + 1,
            activations: current.activations.clone(),
            metadata: current.metadata.clone(),
            created_at: current.created_at,
        };

        for level in self.plan.levels() {
            if self.stop.load(Ordering::SeqCst) {
                return Err(StepError::Cancelled { step });
            }

            let mut join_set: JoinSet<Result<BTreeMap<NodeId, Vec<f64>>, StepError>> =
                JoinSet::new();
            for unit_id in level {
                let unit_id = *unit_id;
                let nodes = self
                    .plan
                    .unit(unit_id)
                    .expect("level ids come from the plan")
                    .nodes
                    .clone();
                let graph = Arc::clone(&self.graph);
                let input = Arc::clone(&current);
                let semaphore = Arc::clone(&self.semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| StepError::Cancelled { step })?;
                    propagate_unit(&graph, &input, unit_id, &nodes, step)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let partial = joined??;
                // Partials are disjoint: each unit only writes its own nodes.
                for (node, vec) in partial {
                    candidate.activations.insert(node, vec);
                }
            }
        }

        let mut rules_applied = 0usize;
        for rule in pipeline.rules() {
            let delta = rule
                .apply(&candidate)
                .map_err(|source| StepError::RuleApplication {
                    rule: rule.name().to_owned(),
                    step,
                    source,
                })?;
            candidate.fold_delta(delta);
            rules_applied += 1;
        }

        if self.stop.load(Ordering::SeqCst) {
            return Err(StepError::Cancelled { step });
        }

        candidate.created_at = Utc::now();
        tracing::debug!(
            committed_step = candidate.step,
            rules_applied,
            "step committed"
        );
        Ok(candidate)
    }
}

/// Propagation for one unit: inbound weighted sums over the start-of-step
/// context, restricted to the unit's nodes.
fn propagate_unit(
    graph: &Graph,
    input: &Context,
    unit: UnitId,
    nodes: &[NodeId],
    step: u64,
) -> Result<BTreeMap<NodeId, Vec<f64>>, StepError> {
    let mut out = BTreeMap::new();
    for node in nodes {
        let mut inbound = graph.inbound_edges(*node).peekable();
        if inbound.peek().is_none() {
            continue;
        }
        let width = graph
            .activation_len(*node)
            .ok_or_else(|| StepError::UnitFailure {
                unit,
                step,
                reason: format!("node {node} missing from graph"),
            })?;
        let mut acc = vec![0.0; width];
        for edge in inbound {
            let source = input
                .activation(edge.source)
                .ok_or_else(|| StepError::UnitFailure {
                    unit,
                    step,
                    reason: format!("no activation for source node {}", edge.source),
                })?;
            for (i, slot) in acc.iter_mut().enumerate() {
                *slot += edge.weight * source.get(i).copied().unwrap_or(0.0);
            }
        }
        out.insert(*node, acc);
    }
    Ok(out)
}
