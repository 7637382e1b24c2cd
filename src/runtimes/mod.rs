//! Runtime layer: lineage management, checkpointing, and configuration.

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpointer_sqlite;
pub mod persistence;
pub mod runtime;
pub mod runtime_config;

pub use checkpoint::{CheckpointError, Checkpointer, InMemoryCheckpointer, Snapshot};
#[cfg(feature = "sqlite")]
pub use checkpointer_sqlite::SqliteCheckpointer;
pub use runtime::{Runtime, RuntimeError};
pub use runtime_config::{CheckpointPolicy, CheckpointerType, RuntimeConfig};
