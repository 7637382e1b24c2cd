//! Checkpoint store: durable, write-once snapshots of committed contexts.
//!
//! A snapshot pairs a committed [`Context`] with a SHA-256 digest over its
//! canonical serialization. Stores are write-once per `(identity, step)`;
//! history is never silently rewritten. Forking copies a snapshot under a new
//! identity, after which the lineages are fully independent.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;

/// Errors from checkpoint operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("a checkpoint already exists for lineage '{identity}' at step {step}")]
    #[diagnostic(
        code(neuroloom::checkpoint::duplicate),
        help("Checkpoints are write-once. Fork the lineage to diverge from this step.")
    )]
    DuplicateCheckpoint { identity: String, step: u64 },

    #[error("no snapshot for lineage '{identity}' at step {step}")]
    #[diagnostic(code(neuroloom::checkpoint::not_found))]
    SnapshotNotFound { identity: String, step: u64 },

    #[error("snapshot digest mismatch for lineage '{identity}' at step {step}")]
    #[diagnostic(
        code(neuroloom::checkpoint::integrity),
        help("The stored context does not match its recorded digest; treat it as corrupt.")
    )]
    IntegrityViolation { identity: String, step: u64 },

    #[error("cannot fork: no source snapshot for lineage '{identity}' at step {step}")]
    #[diagnostic(code(neuroloom::checkpoint::fork_source))]
    ForkSourceInvalid { identity: String, step: u64 },

    #[error("checkpoint backend failure: {message}")]
    #[diagnostic(code(neuroloom::checkpoint::backend))]
    Backend { message: String },

    #[error("snapshot serialization failure: {0}")]
    #[diagnostic(code(neuroloom::checkpoint::serde))]
    Serde(#[from] serde_json::Error),
}

/// A committed context plus its integrity digest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub identity: String,
    pub step: u64,
    pub context: Context,
    /// SHA-256 hex over the context's canonical payload.
    pub digest: String,
    /// When this snapshot was captured (not when the context was committed).
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Captures a snapshot of a committed context.
    #[must_use]
    pub fn capture(context: &Context) -> Self {
        Snapshot {
            identity: context.identity.clone(),
            step: context.step,
            digest: context.digest(),
            context: context.clone(),
            created_at: Utc::now(),
        }
    }

    /// Recomputes the digest and checks it against the recorded one.
    pub fn verify(&self) -> Result<(), CheckpointError> {
        if self.context.digest() == self.digest {
            Ok(())
        } else {
            Err(CheckpointError::IntegrityViolation {
                identity: self.identity.clone(),
                step: self.step,
            })
        }
    }
}

/// Pluggable snapshot store.
///
/// Implementations must be write-once per `(identity, step)` and verify
/// integrity on load. `fork` has a default load-copy-save implementation that
/// backends may override with something cheaper.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persists a snapshot. Fails with [`CheckpointError::DuplicateCheckpoint`]
    /// when `(identity, step)` already exists.
    async fn save(&self, snapshot: Snapshot) -> Result<(), CheckpointError>;

    /// Loads and verifies the snapshot at `(identity, step)`.
    async fn load(&self, identity: &str, step: u64) -> Result<Snapshot, CheckpointError>;

    /// Copies the snapshot at `(identity, step)` under `new_identity`,
    /// creating an independent lineage. Returns the new lineage's snapshot.
    async fn fork(
        &self,
        identity: &str,
        step: u64,
        new_identity: &str,
    ) -> Result<Snapshot, CheckpointError> {
        let source = self.load(identity, step).await.map_err(|err| match err {
            CheckpointError::SnapshotNotFound { identity, step } => {
                CheckpointError::ForkSourceInvalid { identity, step }
            }
            other => other,
        })?;
        let mut context = source.context;
        context.identity = new_identity.to_owned();
        let forked = Snapshot::capture(&context);
        self.save(forked.clone()).await?;
        Ok(forked)
    }

    /// All lineage identities with at least one snapshot, sorted.
    async fn list_lineages(&self) -> Result<Vec<String>, CheckpointError>;

    /// All checkpointed steps for a lineage, ascending. Empty when the
    /// lineage is unknown.
    async fn list_steps(&self, identity: &str) -> Result<Vec<u64>, CheckpointError>;
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    snapshots: RwLock<FxHashMap<String, BTreeMap<u64, Snapshot>>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, snapshot: Snapshot) -> Result<(), CheckpointError> {
        let mut guard = self.snapshots.write();
        let steps = guard.entry(snapshot.identity.clone()).or_default();
        if steps.contains_key(&snapshot.step) {
            return Err(CheckpointError::DuplicateCheckpoint {
                identity: snapshot.identity,
                step: snapshot.step,
            });
        }
        tracing::debug!(
            identity = %snapshot.identity,
            step = snapshot.step,
            "snapshot saved"
        );
        steps.insert(snapshot.step, snapshot);
        Ok(())
    }

    async fn load(&self, identity: &str, step: u64) -> Result<Snapshot, CheckpointError> {
        let snapshot = self
            .snapshots
            .read()
            .get(identity)
            .and_then(|steps| steps.get(&step))
            .cloned()
            .ok_or_else(|| CheckpointError::SnapshotNotFound {
                identity: identity.to_owned(),
                step,
            })?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    async fn list_lineages(&self) -> Result<Vec<String>, CheckpointError> {
        let mut lineages: Vec<String> = self.snapshots.read().keys().cloned().collect();
        lineages.sort();
        Ok(lineages)
    }

    async fn list_steps(&self, identity: &str) -> Result<Vec<u64>, CheckpointError> {
        Ok(self
            .snapshots
            .read()
            .get(identity)
            .map(|steps| steps.keys().copied().collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointer")
            .field("lineages", &self.snapshots.read().len())
            .finish()
    }
}
