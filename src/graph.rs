//! Attributed node/edge graph that the runtime executes over.
//!
//! A [`Graph`] is produced once by an external model-construction stage (via
//! [`GraphBuilder`]) and is read-only for the lifetime of a run. Activation
//! values are never stored on nodes; they live in the per-step
//! [`Context`](crate::context::Context) so the structure can be shared freely
//! across execution units.
//!
//! Cycles in the node/edge graph are expected and valid; only the execution
//! unit DAG (see [`crate::scheduler`]) must be acyclic.

use std::collections::BTreeMap;
use std::fmt;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier of a node, unique within a [`Graph`].
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        NodeId(raw)
    }
}

/// A weighted, directed connection between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
}

/// A node with a fixed activation width and static attributes.
///
/// The structure is immutable once the graph is built; activation values are
/// only ever updated through committed contexts.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Length of this node's activation vector.
    pub activation_len: usize,
    /// Static attributes such as a weighting profile. Never mutated at run time.
    pub attributes: BTreeMap<String, Value>,
    out_edges: Vec<usize>,
}

impl Node {
    /// Indices into [`Graph::edges`] for this node's outgoing edges.
    #[must_use]
    pub fn out_edges(&self) -> &[usize] {
        &self.out_edges
    }
}

/// Errors detected while building a [`Graph`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node id: {id}")]
    #[diagnostic(code(neuroloom::graph::duplicate_node))]
    DuplicateNode { id: NodeId },

    #[error("edge references unknown node: {id}")]
    #[diagnostic(
        code(neuroloom::graph::unknown_node),
        help("Add the node before adding edges that reference it.")
    )]
    UnknownNode { id: NodeId },

    #[error("node {id} has an empty activation vector")]
    #[diagnostic(
        code(neuroloom::graph::empty_activation),
        help("Every node needs an activation width of at least 1.")
    )]
    EmptyActivation { id: NodeId },
}

/// Read-only node/edge structure owned by the runtime.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: FxHashMap<NodeId, Node>,
    edges: Vec<Edge>,
    inbound: FxHashMap<NodeId, Vec<usize>>,
    ordered_ids: Vec<NodeId>,
}

impl Graph {
    /// Builder entry point.
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node ids in ascending order. The stable ordering is what keeps
    /// whole-graph iteration deterministic across runs.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        &self.ordered_ids
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// All edges whose target is `id`, in insertion order.
    pub fn inbound_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.inbound
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|idx| &self.edges[*idx])
    }

    /// All edges whose source is `id`, in insertion order.
    pub fn outbound_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes
            .get(&id)
            .map(|n| n.out_edges.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|idx| &self.edges[*idx])
    }

    /// Activation width of the node, if present.
    #[must_use]
    pub fn activation_len(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(&id).map(|n| n.activation_len)
    }
}

/// Fluent builder validating structural invariants at [`build`](Self::build).
///
/// # Examples
///
/// ```
/// use neuroloom::graph::{Graph, NodeId};
///
/// let graph = Graph::builder()
///     .add_node(NodeId(0), 1)
///     .add_node(NodeId(1), 1)
///     .add_edge(NodeId(0), NodeId(1), 0.5)
///     .build()
///     .unwrap();
/// assert_eq!(graph.node_count(), 2);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(NodeId, usize, BTreeMap<String, Value>)>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with the given activation width and no attributes.
    #[must_use]
    pub fn add_node(self, id: NodeId, activation_len: usize) -> Self {
        self.add_node_with_attributes(id, activation_len, BTreeMap::new())
    }

    /// Adds a node carrying static attributes (e.g. a weighting profile).
    #[must_use]
    pub fn add_node_with_attributes(
        mut self,
        id: NodeId,
        activation_len: usize,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        self.nodes.push((id, activation_len, attributes));
        self
    }

    /// Adds a weighted directed edge. Endpoints are validated at build time.
    #[must_use]
    pub fn add_edge(mut self, source: NodeId, target: NodeId, weight: f64) -> Self {
        self.edges.push(Edge {
            source,
            target,
            weight,
        });
        self
    }

    /// Validates and freezes the graph.
    pub fn build(self) -> Result<Graph, GraphError> {
        let mut nodes: FxHashMap<NodeId, Node> = FxHashMap::default();
        for (id, activation_len, attributes) in self.nodes {
            if activation_len == 0 {
                return Err(GraphError::EmptyActivation { id });
            }
            if nodes
                .insert(
                    id,
                    Node {
                        id,
                        activation_len,
                        attributes,
                        out_edges: Vec::new(),
                    },
                )
                .is_some()
            {
                return Err(GraphError::DuplicateNode { id });
            }
        }

        let mut inbound: FxHashMap<NodeId, Vec<usize>> = FxHashMap::default();
        for (idx, edge) in self.edges.iter().enumerate() {
            if !nodes.contains_key(&edge.source) {
                return Err(GraphError::UnknownNode { id: edge.source });
            }
            if !nodes.contains_key(&edge.target) {
                return Err(GraphError::UnknownNode { id: edge.target });
            }
            nodes
                .get_mut(&edge.source)
                .expect("endpoint checked above")
                .out_edges
                .push(idx);
            inbound.entry(edge.target).or_default().push(idx);
        }

        let mut ordered_ids: Vec<NodeId> = nodes.keys().copied().collect();
        ordered_ids.sort_unstable();

        tracing::debug!(
            nodes = ordered_ids.len(),
            edges = self.edges.len(),
            "graph built"
        );

        Ok(Graph {
            nodes,
            edges: self.edges,
            inbound,
            ordered_ids,
        })
    }
}
