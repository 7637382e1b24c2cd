//! Step plan: validated topological leveling of the execution unit DAG.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::graph::{Graph, NodeId};
use crate::units::{ExecutionUnit, UnitId};

/// Construction-time plan failures. All fatal; a scheduler is never built
/// from an invalid unit set.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error("duplicate execution unit id: {id}")]
    #[diagnostic(code(neuroloom::scheduler::duplicate_unit))]
    DuplicateUnit { id: UnitId },

    #[error("unit {unit} names unknown predecessor {predecessor}")]
    #[diagnostic(code(neuroloom::scheduler::unknown_predecessor))]
    UnknownPredecessor { unit: UnitId, predecessor: UnitId },

    #[error("unit {unit} claims node {node}, which is not in the graph")]
    #[diagnostic(code(neuroloom::scheduler::unknown_node))]
    UnknownNode { unit: UnitId, node: NodeId },

    #[error("node {node} is claimed by both unit {first} and unit {second}")]
    #[diagnostic(
        code(neuroloom::scheduler::shared_node),
        help("Units must partition the graph: every node belongs to exactly one unit.")
    )]
    SharedNode {
        node: NodeId,
        first: UnitId,
        second: UnitId,
    },

    #[error("graph node {node} is not assigned to any unit")]
    #[diagnostic(
        code(neuroloom::scheduler::unassigned_node),
        help("Units must partition the graph: every node belongs to exactly one unit.")
    )]
    UnassignedNode { node: NodeId },

    #[error("execution unit dependencies form a cycle involving {involved:?}")]
    #[diagnostic(
        code(neuroloom::scheduler::cyclic_units),
        help("Unit predecessor edges must form a DAG. Node/edge cycles in the graph are fine.")
    )]
    CyclicUnits { involved: Vec<UnitId> },
}

/// The validated schedule: units grouped into topological levels.
///
/// Every unit in a level has all its predecessors in strictly earlier levels,
/// so units within one level may run concurrently. Unit ids within a level are
/// sorted, which keeps task spawn order (and therefore logs) stable.
#[derive(Debug)]
pub struct StepPlan {
    levels: Vec<Vec<UnitId>>,
    units: FxHashMap<UnitId, ExecutionUnit>,
}

impl StepPlan {
    /// Validates the unit set against the graph and computes topological
    /// levels via Kahn's algorithm.
    pub fn new(graph: &Graph, units: Vec<ExecutionUnit>) -> Result<Self, PlanError> {
        let mut by_id: FxHashMap<UnitId, ExecutionUnit> = FxHashMap::default();
        for unit in units {
            let id = unit.id;
            if by_id.insert(id, unit).is_some() {
                return Err(PlanError::DuplicateUnit { id });
            }
        }

        // Exact partition: every claimed node exists and is claimed once,
        // every graph node is claimed.
        let mut owner: FxHashMap<NodeId, UnitId> = FxHashMap::default();
        for unit in by_id.values() {
            for node in &unit.nodes {
                if !graph.contains(*node) {
                    return Err(PlanError::UnknownNode {
                        unit: unit.id,
                        node: *node,
                    });
                }
                if let Some(first) = owner.insert(*node, unit.id) {
                    let (first, second) = if first < unit.id {
                        (first, unit.id)
                    } else {
                        (unit.id, first)
                    };
                    return Err(PlanError::SharedNode {
                        node: *node,
                        first,
                        second,
                    });
                }
            }
        }
        for node in graph.node_ids() {
            if !owner.contains_key(node) {
                return Err(PlanError::UnassignedNode { node: *node });
            }
        }

        // Predecessors exist.
        for unit in by_id.values() {
            for pred in &unit.predecessors {
                if !by_id.contains_key(pred) {
                    return Err(PlanError::UnknownPredecessor {
                        unit: unit.id,
                        predecessor: *pred,
                    });
                }
            }
        }

        // Kahn leveling over the predecessor relation.
        let mut in_degree: FxHashMap<UnitId, usize> = FxHashMap::default();
        let mut successors: FxHashMap<UnitId, Vec<UnitId>> = FxHashMap::default();
        for unit in by_id.values() {
            in_degree.entry(unit.id).or_insert(0);
            for pred in &unit.predecessors {
                *in_degree.entry(unit.id).or_insert(0) += 1;
                successors.entry(*pred).or_default().push(unit.id);
            }
        }
        // Self-loops never reach degree zero, so the cycle check below covers them.

        let mut frontier: Vec<UnitId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        frontier.sort_unstable();

        let mut levels: Vec<Vec<UnitId>> = Vec::new();
        let mut placed: FxHashSet<UnitId> = FxHashSet::default();
        while !frontier.is_empty() {
            let mut next: Vec<UnitId> = Vec::new();
            for id in &frontier {
                placed.insert(*id);
                if let Some(succs) = successors.get(id) {
                    for succ in succs {
                        let degree = in_degree
                            .get_mut(succ)
                            .expect("successor seeded in degree map");
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*succ);
                        }
                    }
                }
            }
            next.sort_unstable();
            levels.push(std::mem::replace(&mut frontier, next));
        }

        if placed.len() != by_id.len() {
            let mut involved: Vec<UnitId> = by_id
                .keys()
                .filter(|id| !placed.contains(id))
                .copied()
                .collect();
            involved.sort_unstable();
            return Err(PlanError::CyclicUnits { involved });
        }

        tracing::debug!(
            units = by_id.len(),
            levels = levels.len(),
            "step plan constructed"
        );

        Ok(StepPlan {
            levels,
            units: by_id,
        })
    }

    /// Topological levels, earliest first.
    #[must_use]
    pub fn levels(&self) -> &[Vec<UnitId>] {
        &self.levels
    }

    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&ExecutionUnit> {
        self.units.get(&id)
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}
