//! Runtime configuration: concurrency, checkpoint backend, and cadence.

use std::thread::available_parallelism;

/// Which checkpoint backend the runtime should use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CheckpointerType {
    /// No durable store; checkpoints live only in process memory.
    #[default]
    InMemory,
    /// Durable SQLite store (requires the `sqlite` feature).
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// When the runtime checkpoints automatically after a committed step.
///
/// Cadence is a durability/overhead trade only. Restore and fork operate on
/// whatever snapshots exist and are correct under any policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Never checkpoint automatically; `checkpoint_now` still works.
    #[default]
    Disabled,
    /// Checkpoint after every committed step.
    EveryStep,
    /// Checkpoint after every n-th committed step.
    Interval(u64),
}

impl CheckpointPolicy {
    /// Whether a checkpoint is due after committing `step`.
    #[must_use]
    pub fn is_due(&self, step: u64) -> bool {
        match self {
            CheckpointPolicy::Disabled => false,
            CheckpointPolicy::EveryStep => true,
            CheckpointPolicy::Interval(n) => *n > 0 && step % *n == 0,
        }
    }
}

/// Configuration for a [`Runtime`](super::Runtime).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Max units of a level executing at once.
    pub concurrency_limit: usize,
    /// Checkpoint backend selection.
    pub checkpointer: CheckpointerType,
    /// Automatic checkpoint cadence.
    pub checkpoint_policy: CheckpointPolicy,
    /// SQLite database file, when the sqlite backend is selected.
    /// `NEUROLOOM_SQLITE_DB` in the environment (or a `.env` file) overrides
    /// the built-in default.
    pub sqlite_db_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let _ = dotenvy::dotenv();
        let sqlite_db_name =
            std::env::var("NEUROLOOM_SQLITE_DB").unwrap_or_else(|_| "neuroloom.db".to_owned());
        RuntimeConfig {
            concurrency_limit: available_parallelism().map(|n| n.get()).unwrap_or(4),
            checkpointer: CheckpointerType::default(),
            checkpoint_policy: CheckpointPolicy::default(),
            sqlite_db_name,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: CheckpointerType) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    #[must_use]
    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    #[must_use]
    pub fn with_sqlite_db_name(mut self, name: impl Into<String>) -> Self {
        self.sqlite_db_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_policy_cadence() {
        let policy = CheckpointPolicy::Interval(3);
        assert!(!policy.is_due(1));
        assert!(!policy.is_due(2));
        assert!(policy.is_due(3));
        assert!(policy.is_due(6));
    }

    #[test]
    fn zero_interval_never_due() {
        assert!(!CheckpointPolicy::Interval(0).is_due(5));
    }

    #[test]
    fn disabled_never_due() {
        assert!(!CheckpointPolicy::Disabled.is_due(1));
    }
}
