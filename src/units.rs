//! Execution units: the schedulable partitions of a graph.
//!
//! An [`ExecutionUnit`] owns a disjoint set of graph nodes and declares which
//! other units must finish earlier within a step. The unit dependency relation
//! must form a DAG; the scheduler validates that (and that the units exactly
//! partition the graph) at construction time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// Identifier of an execution unit, unique within a scheduler plan.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

impl From<u32> for UnitId {
    fn from(raw: u32) -> Self {
        UnitId(raw)
    }
}

/// A schedulable partition of graph nodes.
///
/// Predecessors are ordering constraints *within* a step: this unit's
/// propagation runs only after every predecessor unit has finished its own.
/// They do not change what data the unit reads; every unit in a step reads the
/// same start-of-step context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub id: UnitId,
    /// Graph nodes owned by this unit. Each node belongs to exactly one unit.
    pub nodes: Vec<NodeId>,
    /// Units that must complete earlier in the same step.
    pub predecessors: Vec<UnitId>,
}

impl ExecutionUnit {
    /// A unit with no ordering constraints.
    #[must_use]
    pub fn new(id: UnitId, nodes: Vec<NodeId>) -> Self {
        ExecutionUnit {
            id,
            nodes,
            predecessors: Vec::new(),
        }
    }

    /// A unit that runs after the given predecessor units.
    #[must_use]
    pub fn with_predecessors(id: UnitId, nodes: Vec<NodeId>, predecessors: Vec<UnitId>) -> Self {
        ExecutionUnit {
            id,
            nodes,
            predecessors,
        }
    }
}
