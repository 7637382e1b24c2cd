//! Boundary rules: memory shard merges, live-signal overrides, and guards.
//!
//! External subsystems never get a privileged channel into the runtime. A
//! consolidated memory shard, a live input signal, or a safety veto each enter
//! the step as one more [`Rule`] in the pipeline, subject to the same ordering
//! and atomicity as everything else.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Context, ContextDelta};
use crate::graph::NodeId;
use crate::rules::{Rule, RuleError};

/// A consolidated state fragment produced outside the runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryShard {
    /// Activation overrides to merge into the candidate context.
    pub activations: BTreeMap<NodeId, Vec<f64>>,
    /// Metadata entries to merge.
    pub metadata: BTreeMap<String, Value>,
}

impl MemoryShard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_activation(mut self, id: NodeId, vec: Vec<f64>) -> Self {
        self.activations.insert(id, vec);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty() && self.metadata.is_empty()
    }
}

/// Merges a fixed [`MemoryShard`] into every candidate context it sees.
#[derive(Debug)]
pub struct ShardMergeRule {
    name: String,
    priority: i32,
    shard: MemoryShard,
}

impl ShardMergeRule {
    #[must_use]
    pub fn new(name: impl Into<String>, shard: MemoryShard) -> Self {
        ShardMergeRule {
            name: name.into(),
            priority: 0,
            shard,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for ShardMergeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _ctx: &Context) -> Result<ContextDelta, RuleError> {
        let mut delta = ContextDelta::new();
        if !self.shard.activations.is_empty() {
            delta.activations = Some(self.shard.activations.clone());
        }
        if !self.shard.metadata.is_empty() {
            delta.metadata = Some(self.shard.metadata.clone());
        }
        Ok(delta)
    }
}

/// Overrides selected node activations with a live external signal.
///
/// This is the per-step "sensor clamp": whatever propagation produced for the
/// listed nodes is replaced by the supplied values.
#[derive(Debug)]
pub struct SignalOverrideRule {
    name: String,
    priority: i32,
    signal: BTreeMap<NodeId, Vec<f64>>,
}

impl SignalOverrideRule {
    #[must_use]
    pub fn new(name: impl Into<String>, signal: BTreeMap<NodeId, Vec<f64>>) -> Self {
        SignalOverrideRule {
            name: name.into(),
            priority: 0,
            signal,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for SignalOverrideRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _ctx: &Context) -> Result<ContextDelta, RuleError> {
        Ok(ContextDelta::new().with_activations(self.signal.clone()))
    }
}

/// Vetoes a step when a predicate rejects the candidate context.
///
/// Defaults to `i32::MIN` priority so the veto runs before any other rule can
/// transform the candidate. A rejection aborts the step and keeps the previous
/// context current.
pub struct GuardRule {
    name: String,
    priority: i32,
    #[allow(clippy::type_complexity)]
    predicate: Arc<dyn Fn(&Context) -> Result<(), String> + Send + Sync>,
}

impl GuardRule {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context) -> Result<(), String> + Send + Sync + 'static,
    {
        GuardRule {
            name: name.into(),
            priority: i32::MIN,
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for GuardRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, ctx: &Context) -> Result<ContextDelta, RuleError> {
        match (self.predicate)(ctx) {
            Ok(()) => Ok(ContextDelta::new()),
            Err(reason) => Err(RuleError::Rejected { reason }),
        }
    }
}

impl std::fmt::Debug for GuardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
