//! Snapshot-able runtime state.
//!
//! A [`Context`] is the full mutable state of a lineage at a given step:
//! per-node activation vectors plus free-form metadata. Contexts are immutable
//! once committed; advancing a step always produces a *new* value, which is
//! what makes point-in-time checkpoints and replay comparisons trivial.
//!
//! Activation and metadata maps are `BTreeMap`s on purpose: the canonical key
//! ordering makes serialization (and therefore the integrity digest and the
//! replay law) byte-stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::graph::{Graph, NodeId};

/// Errors raised while assembling an initial context.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("activation supplied for unknown node: {id}")]
    #[diagnostic(
        code(neuroloom::context::unknown_node),
        help("Initial activations may only reference nodes present in the graph.")
    )]
    UnknownNode { id: NodeId },

    #[error("activation for node {id} has length {got}, expected {expected}")]
    #[diagnostic(code(neuroloom::context::activation_len))]
    ActivationLength {
        id: NodeId,
        got: usize,
        expected: usize,
    },
}

/// Full runtime state of one lineage at one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Lineage this context belongs to.
    pub identity: String,
    /// Monotonic step counter, starting at 0 for the initial context.
    pub step: u64,
    /// Per-node activation vectors, keyed in canonical order.
    pub activations: BTreeMap<NodeId, Vec<f64>>,
    /// Free-form metadata carried across steps.
    pub metadata: BTreeMap<String, Value>,
    /// Commit wall-clock time. Excluded from the digest so replays of the
    /// same inputs stay byte-identical.
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CanonicalPayload<'a> {
    identity: &'a str,
    step: u64,
    activations: &'a BTreeMap<NodeId, Vec<f64>>,
    metadata: &'a BTreeMap<String, Value>,
}

impl Context {
    /// Initial context for a lineage: step 0, every node zero-activated.
    #[must_use]
    pub fn initial(identity: impl Into<String>, graph: &Graph) -> Self {
        let identity = identity.into();
        let mut activations = BTreeMap::new();
        for id in graph.node_ids() {
            let len = graph.activation_len(*id).unwrap_or(1);
            activations.insert(*id, vec![0.0; len]);
        }
        Context {
            identity,
            step: 0,
            activations,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder for seeding activations and metadata on the initial context.
    #[must_use]
    pub fn builder(identity: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            identity: identity.into(),
            activations: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Canonical serialized payload: identity, step, activations, metadata.
    ///
    /// `created_at` is deliberately excluded so a replayed run digests
    /// identically to the original.
    #[must_use]
    pub fn canonical_payload(&self) -> Vec<u8> {
        let payload = CanonicalPayload {
            identity: &self.identity,
            step: self.step,
            activations: &self.activations,
            metadata: &self.metadata,
        };
        serde_json::to_vec(&payload).expect("canonical payload serializes: keys are strings/ints")
    }

    /// SHA-256 hex digest over [`canonical_payload`](Self::canonical_payload).
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_payload());
        let out = hasher.finalize();
        let mut hex = String::with_capacity(out.len() * 2);
        for byte in out {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    /// Activation vector for a node, if present.
    #[must_use]
    pub fn activation(&self, id: NodeId) -> Option<&[f64]> {
        self.activations.get(&id).map(Vec::as_slice)
    }

    /// Folds a rule delta into this (not yet committed) context.
    ///
    /// Activation overrides replace whole vectors; metadata inserts happen in
    /// key order, then removals. Deterministic for a fixed delta.
    pub(crate) fn fold_delta(&mut self, delta: ContextDelta) {
        if let Some(acts) = delta.activations {
            for (id, vec) in acts {
                self.activations.insert(id, vec);
            }
        }
        if let Some(meta) = delta.metadata {
            for (key, value) in meta {
                self.metadata.insert(key, value);
            }
        }
        if let Some(keys) = delta.remove_metadata {
            for key in keys {
                self.metadata.remove(&key);
            }
        }
    }
}

/// Partial update returned by a rule.
///
/// All fields are optional; a rule only names the state it wants to touch and
/// the scheduler folds deltas in pipeline order.
#[derive(Clone, Debug, Default)]
pub struct ContextDelta {
    /// Whole-vector activation overrides.
    pub activations: Option<BTreeMap<NodeId, Vec<f64>>>,
    /// Metadata entries to insert or replace.
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Metadata keys to drop, applied after inserts.
    pub remove_metadata: Option<Vec<String>>,
}

impl ContextDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_activations(mut self, activations: BTreeMap<NodeId, Vec<f64>>) -> Self {
        self.activations = Some(activations);
        self
    }

    #[must_use]
    pub fn with_activation(mut self, id: NodeId, vec: Vec<f64>) -> Self {
        self.activations.get_or_insert_with(BTreeMap::new).insert(id, vec);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_removal(mut self, key: impl Into<String>) -> Self {
        self.remove_metadata
            .get_or_insert_with(Vec::new)
            .push(key.into());
        self
    }

    /// True when the delta touches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activations.is_none() && self.metadata.is_none() && self.remove_metadata.is_none()
    }
}

/// Fluent builder for an initial [`Context`].
///
/// Nodes without an explicit seed get a zero vector of the graph's width.
#[derive(Debug)]
pub struct ContextBuilder {
    identity: String,
    activations: BTreeMap<NodeId, Vec<f64>>,
    metadata: BTreeMap<String, Value>,
}

impl ContextBuilder {
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

    /// Validates the seeds against the graph and produces the step-0 context.
    pub fn build(self, graph: &Graph) -> Result<Context, ContextError> {
        for (id, vec) in &self.activations {
            let expected = graph
                .activation_len(*id)
                .ok_or(ContextError::UnknownNode { id: *id })?;
            if vec.len() != expected {
                return Err(ContextError::ActivationLength {
                    id: *id,
                    got: vec.len(),
                    expected,
                });
            }
        }
        let mut context = Context::initial(self.identity, graph);
        for (id, vec) in self.activations {
            context.activations.insert(id, vec);
        }
        context.metadata = self.metadata;
        Ok(context)
    }
}
