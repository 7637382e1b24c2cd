//! # Neuroloom: Stepped Execution Runtime for Graph Models
//!
//! Neuroloom advances an attributed node/edge graph in discrete, atomic steps.
//! Execution units partition the graph and run concurrently under a dependency
//! DAG; a deterministic rule pipeline transforms each step's candidate
//! context; committed contexts are checkpointed so any lineage can be
//! restored or forked at a recorded step.
//!
//! ## Core Concepts
//!
//! - **Graph**: read-only nodes and weighted edges, built once up front
//! - **Context**: the full state of a lineage at a step, immutable once committed
//! - **Execution units**: disjoint node partitions scheduled over a DAG
//! - **Rules**: ordered, pure transformations folded after propagation
//! - **Lineages**: named state timelines that checkpoint, restore, and fork
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use neuroloom::graph::{Graph, NodeId};
//! use neuroloom::runtimes::{Runtime, RuntimeConfig};
//! use neuroloom::units::{ExecutionUnit, UnitId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let graph = Arc::new(
//!     Graph::builder()
//!         .add_node(NodeId(0), 1)
//!         .add_node(NodeId(1), 1)
//!         .add_edge(NodeId(0), NodeId(1), 0.5)
//!         .build()?,
//! );
//! let units = vec![
//!     ExecutionUnit::new(UnitId(0), vec![NodeId(0)]),
//!     ExecutionUnit::with_predecessors(UnitId(1), vec![NodeId(1)], vec![UnitId(0)]),
//! ];
//!
//! let runtime = Runtime::new(graph, units, RuntimeConfig::default()).await?;
//! runtime.create_lineage("session-1")?;
//! runtime.step("session-1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Node/edge structure and the validating builder
//! - [`context`] - Committed state, deltas, and canonical digests
//! - [`units`] - Execution unit partitions and their dependency declarations
//! - [`rules`] - The rule trait, pipeline, and boundary rules (shards, guards)
//! - [`scheduler`] - Step plans, concurrent levels, and atomic commits
//! - [`runtimes`] - The runtime facade, checkpoint stores, and configuration
//! - [`validator`] - Read-only scoring of histories against reference signals
//! - [`events`] - Lifecycle events and sinks
//! - [`telemetry`] - Opt-in tracing setup

pub mod context;
pub mod events;
pub mod graph;
pub mod rules;
pub mod runtimes;
pub mod scheduler;
pub mod telemetry;
pub mod units;
pub mod validator;
