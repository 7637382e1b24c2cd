//! Persisted snapshot shapes, decoupled from the in-memory types.
//!
//! Storage rows keep their own field encodings (RFC3339 strings, JSON text)
//! so the in-memory [`Snapshot`] can evolve without breaking stored data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointError, Snapshot};
use crate::context::Context;

/// Row shape for a stored snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct PersistedSnapshot {
    pub identity: String,
    pub step: i64,
    pub digest: String,
    /// The full context, serialized as canonical JSON plus `created_at`.
    pub context_json: String,
    /// RFC3339 capture timestamp.
    pub created_at: String,
}

impl PersistedSnapshot {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, CheckpointError> {
        Ok(PersistedSnapshot {
            identity: snapshot.identity.clone(),
            step: snapshot.step as i64,
            digest: snapshot.digest.clone(),
            context_json: serde_json::to_string(&snapshot.context)?,
            created_at: snapshot.created_at.to_rfc3339(),
        })
    }

    pub fn into_snapshot(self) -> Result<Snapshot, CheckpointError> {
        let context: Context = serde_json::from_str(&self.context_json)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| CheckpointError::Backend {
                message: format!("bad created_at in stored snapshot: {err}"),
            })?;
        Ok(Snapshot {
            identity: self.identity,
            step: self.step as u64,
            context,
            digest: self.digest,
            created_at,
        })
    }
}
