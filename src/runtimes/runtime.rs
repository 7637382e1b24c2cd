//! Runtime facade: lineage management over the scheduler, pipeline, and
//! checkpoint store.

use std::collections::BTreeMap;
use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, Checkpointer, InMemoryCheckpointer, Snapshot};
use super::runtime_config::{CheckpointerType, RuntimeConfig};
use crate::context::{Context, ContextError};
use crate::events::{EventBus, RuntimeEvent};
use crate::graph::Graph;
use crate::rules::shards::{MemoryShard, ShardMergeRule};
use crate::rules::{PipelineError, Rule, RuleInfo, RulePipeline};
use crate::scheduler::{PlanError, Scheduler, StepError, StopHandle};
use crate::units::ExecutionUnit;

/// Errors surfaced by [`Runtime`] operations.
#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("unknown lineage: '{identity}'")]
    #[diagnostic(
        code(neuroloom::runtime::lineage_not_found),
        help("Create the lineage first, or restore it from a checkpoint.")
    )]
    LineageNotFound { identity: String },

    #[error("lineage '{identity}' already exists")]
    #[diagnostic(code(neuroloom::runtime::lineage_exists))]
    LineageExists { identity: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),
}

struct LineageState {
    current: Arc<Context>,
    /// Committed contexts in order, initial context first.
    history: Vec<Arc<Context>>,
}

/// Owns the execution state of one or more lineages over a shared graph.
///
/// The runtime is the only writer of lineage state. Steps are atomic: a
/// failed step leaves the lineage's current context untouched. Exports
/// ([`history`](Self::history), [`current`](Self::current)) hand out shared
/// references to committed contexts only.
pub struct Runtime {
    graph: Arc<Graph>,
    scheduler: Scheduler,
    pipeline: RwLock<RulePipeline>,
    checkpointer: Arc<dyn Checkpointer>,
    lineages: RwLock<FxHashMap<String, LineageState>>,
    config: RuntimeConfig,
    event_bus: EventBus,
}

impl Runtime {
    /// Builds a runtime, resolving the checkpoint backend from the config.
    pub async fn new(
        graph: Arc<Graph>,
        units: Vec<ExecutionUnit>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let checkpointer: Arc<dyn Checkpointer> = match config.checkpointer {
            CheckpointerType::InMemory => Arc::new(InMemoryCheckpointer::new()),
            #[cfg(feature = "sqlite")]
            CheckpointerType::Sqlite => Arc::new(
                super::checkpointer_sqlite::SqliteCheckpointer::connect(&config.sqlite_db_name)
                    .await?,
            ),
        };
        Self::with_checkpointer(graph, units, config, checkpointer)
    }

    /// Builds a runtime around a caller-supplied checkpoint store.
    pub fn with_checkpointer(
        graph: Arc<Graph>,
        units: Vec<ExecutionUnit>,
        config: RuntimeConfig,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Result<Self, RuntimeError> {
        let scheduler = Scheduler::new(Arc::clone(&graph), units, config.concurrency_limit)?;
        Ok(Runtime {
            graph,
            scheduler,
            pipeline: RwLock::new(RulePipeline::new()),
            checkpointer,
            lineages: RwLock::new(FxHashMap::default()),
            config,
            event_bus: EventBus::default(),
        })
    }

    /// A fresh lineage identity.
    #[must_use]
    pub fn generate_lineage_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Handle for cancelling in-flight steps.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    // ---- pipeline management -------------------------------------------

    pub fn register_rule(&self, rule: Arc<dyn Rule>) -> Result<(), RuntimeError> {
        self.pipeline.write().register(rule)?;
        Ok(())
    }

    /// Registers a rule the system itself produced. Ordinary registration;
    /// origin carries no special treatment.
    pub fn evolve_rule(&self, rule: Arc<dyn Rule>) -> Result<(), RuntimeError> {
        self.pipeline.write().evolve(rule)?;
        Ok(())
    }

    pub fn unregister_rule(&self, name: &str) -> bool {
        self.pipeline.write().unregister(name)
    }

    #[must_use]
    pub fn describe_rules(&self) -> Vec<RuleInfo> {
        self.pipeline.read().describe()
    }

    // ---- lineage lifecycle ---------------------------------------------

    /// Creates a lineage at step 0 with zero activations.
    pub fn create_lineage(&self, identity: impl Into<String>) -> Result<(), RuntimeError> {
        let identity = identity.into();
        self.install_lineage(Context::initial(identity, &self.graph))
    }

    /// Creates a lineage from a pre-built initial context (step 0).
    pub fn create_lineage_from(&self, context: Context) -> Result<(), RuntimeError> {
        self.install_lineage(context)
    }

    fn install_lineage(&self, context: Context) -> Result<(), RuntimeError> {
        let mut lineages = self.lineages.write();
        if lineages.contains_key(&context.identity) {
            return Err(RuntimeError::LineageExists {
                identity: context.identity,
            });
        }
        tracing::info!(identity = %context.identity, "lineage created");
        let current = Arc::new(context);
        lineages.insert(
            current.identity.clone(),
            LineageState {
                current: Arc::clone(&current),
                history: vec![current],
            },
        );
        Ok(())
    }

    /// Current context of a lineage.
    pub fn current(&self, identity: &str) -> Result<Arc<Context>, RuntimeError> {
        self.lineages
            .read()
            .get(identity)
            .map(|l| Arc::clone(&l.current))
            .ok_or_else(|| RuntimeError::LineageNotFound {
                identity: identity.to_owned(),
            })
    }

    /// Committed contexts of a lineage in order, initial context first.
    ///
    /// This is the read-only export boundary: callers get shared references
    /// to immutable contexts and can never write back into the runtime.
    pub fn history(&self, identity: &str) -> Result<Vec<Arc<Context>>, RuntimeError> {
        self.lineages
            .read()
            .get(identity)
            .map(|l| l.history.clone())
            .ok_or_else(|| RuntimeError::LineageNotFound {
                identity: identity.to_owned(),
            })
    }

    /// Identities of lineages currently resident in this runtime, sorted.
    #[must_use]
    pub fn lineages(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lineages.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ---- stepping -------------------------------------------------------

    /// Executes one step for a lineage and returns the committed step number.
    #[instrument(skip(self), err)]
    pub async fn step(&self, identity: &str) -> Result<u64, RuntimeError> {
        let current = self.current(identity)?;
        let snapshot = self.pipeline.read().snapshot();
        let rules_applied = snapshot.len();

        let committed = match self.scheduler.step(Arc::clone(&current), snapshot).await {
            Ok(committed) => committed,
            Err(err) => {
                self.event_bus.emit(RuntimeEvent::StepFailed {
                    identity: identity.to_owned(),
                    step: current.step,
                    error: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let step = committed.step;
        let committed = Arc::new(committed);
        {
            let mut lineages = self.lineages.write();
            let lineage =
                lineages
                    .get_mut(identity)
                    .ok_or_else(|| RuntimeError::LineageNotFound {
                        identity: identity.to_owned(),
                    })?;
            lineage.current = Arc::clone(&committed);
            lineage.history.push(Arc::clone(&committed));
        }
        self.event_bus.emit(RuntimeEvent::StepCommitted {
            identity: identity.to_owned(),
            step,
            rules_applied,
        });

        if self.config.checkpoint_policy.is_due(step) {
            self.save_snapshot(Snapshot::capture(&committed)).await?;
        }
        Ok(step)
    }

    /// Executes `steps` consecutive steps; returns the last committed step.
    #[instrument(skip(self), err)]
    pub async fn run(&self, identity: &str, steps: u64) -> Result<u64, RuntimeError> {
        let mut last = self.current(identity)?.step;
        for _ in 0..steps {
            last = self.step(identity).await?;
        }
        Ok(last)
    }

    /// One step per input, merging each [`MemoryShard`] into exactly the step
    /// it accompanies. Returns the last committed step.
    ///
    /// The transient merge rule registers under a generated name, so it never
    /// collides with user-registered rules.
    pub async fn run_with_inputs(
        &self,
        identity: &str,
        inputs: Vec<MemoryShard>,
    ) -> Result<u64, RuntimeError> {
        let input_rule = format!("live-input-{}", Uuid::new_v4());
        let mut last = self.current(identity)?.step;
        for shard in inputs {
            if !shard.is_empty() {
                self.register_rule(Arc::new(
                    ShardMergeRule::new(input_rule.clone(), shard).with_priority(-100),
                ))?;
            }
            let result = self.step(identity).await;
            self.unregister_rule(&input_rule);
            last = result?;
        }
        Ok(last)
    }

    // ---- checkpoints ----------------------------------------------------

    /// Checkpoints the lineage's current context immediately, regardless of
    /// policy.
    #[instrument(skip(self), err)]
    pub async fn checkpoint_now(&self, identity: &str) -> Result<(), RuntimeError> {
        let current = self.current(identity)?;
        self.save_snapshot(Snapshot::capture(&current)).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), RuntimeError> {
        let identity = snapshot.identity.clone();
        let step = snapshot.step;
        let digest = snapshot.digest.clone();
        self.checkpointer.save(snapshot).await?;
        self.event_bus.emit(RuntimeEvent::CheckpointSaved {
            identity,
            step,
            digest,
        });
        Ok(())
    }

    /// Resets a lineage to a checkpointed step. History after that step is
    /// discarded; the lineage is created in-memory when absent (e.g. after a
    /// process restart).
    #[instrument(skip(self), err)]
    pub async fn restore(&self, identity: &str, step: u64) -> Result<(), RuntimeError> {
        let snapshot = self.checkpointer.load(identity, step).await?;
        let restored = Arc::new(snapshot.context);

        let mut lineages = self.lineages.write();
        match lineages.get_mut(identity) {
            Some(lineage) => {
                lineage.history.retain(|ctx| ctx.step < step);
                lineage.history.push(Arc::clone(&restored));
                lineage.current = restored;
            }
            None => {
                lineages.insert(
                    identity.to_owned(),
                    LineageState {
                        current: Arc::clone(&restored),
                        history: vec![restored],
                    },
                );
            }
        }
        tracing::info!(%identity, step, "lineage restored");
        Ok(())
    }

    /// Forks a new lineage from a checkpointed step of an existing one.
    ///
    /// `metadata` entries are merged into the forked context before its
    /// snapshot is captured, so the fork's digest covers them. The new
    /// lineage is fully independent afterwards.
    #[instrument(skip(self, metadata), err)]
    pub async fn fork(
        &self,
        identity: &str,
        step: u64,
        new_identity: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        if self.lineages.read().contains_key(new_identity) {
            return Err(RuntimeError::LineageExists {
                identity: new_identity.to_owned(),
            });
        }

        let source = self
            .checkpointer
            .load(identity, step)
            .await
            .map_err(|err| match err {
                CheckpointError::SnapshotNotFound { identity, step } => {
                    CheckpointError::ForkSourceInvalid { identity, step }
                }
                other => other,
            })?;

        let mut context = source.context;
        context.identity = new_identity.to_owned();
        for (key, value) in metadata {
            context.metadata.insert(key, value);
        }
        let snapshot = Snapshot::capture(&context);
        self.checkpointer.save(snapshot).await?;

        let current = Arc::new(context);
        self.lineages.write().insert(
            new_identity.to_owned(),
            LineageState {
                current: Arc::clone(&current),
                history: vec![current],
            },
        );
        self.event_bus.emit(RuntimeEvent::LineageForked {
            source: identity.to_owned(),
            step,
            new_identity: new_identity.to_owned(),
        });
        Ok(())
    }

    /// Lineages known to the checkpoint store.
    pub async fn stored_lineages(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.checkpointer.list_lineages().await?)
    }

    /// Checkpointed steps for a lineage, ascending.
    pub async fn stored_steps(&self, identity: &str) -> Result<Vec<u64>, RuntimeError> {
        Ok(self.checkpointer.list_steps(identity).await?)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("lineages", &self.lineages.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
