//! SQLite-backed checkpoint store.
//!
//! Durable implementation of [`Checkpointer`] on top of sqlx. Snapshots map
//! to one `snapshots` row each, keyed by `(identity, step)`; the write-once
//! invariant is enforced by the table's primary key. Serialization goes
//! through the persistence shapes in [`super::persistence`], so this module
//! stays focused on database I/O.
//!
//! When the `sqlite-migrations` feature is enabled (default), embedded
//! migrations (`sqlx::migrate!("./migrations")`) run on connect; disabling
//! the feature assumes external migration orchestration.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::instrument;

use super::checkpoint::{CheckpointError, Checkpointer, Snapshot};
use super::persistence::PersistedSnapshot;

fn backend(context: &str, err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Backend {
        message: format!("{context}: {err}"),
    }
}

/// Durable snapshot store on a local SQLite database.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connects to (or creates) the database file at `path`.
    #[must_use = "checkpointer must be used to persist snapshots"]
    #[instrument(skip(path))]
    pub async fn connect(path: &str) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| backend("connect", e))?;

        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| backend("migrate", e))?;
        }

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, snapshot), fields(identity = %snapshot.identity, step = snapshot.step), err)]
    async fn save(&self, snapshot: Snapshot) -> Result<(), CheckpointError> {
        let row = PersistedSnapshot::from_snapshot(&snapshot)?;
        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (identity, step, digest, context_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&row.identity)
        .bind(row.step)
        .bind(&row.digest)
        .bind(&row.context_json)
        .bind(&row.created_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CheckpointError::DuplicateCheckpoint {
                    identity: snapshot.identity,
                    step: snapshot.step,
                })
            }
            Err(e) => Err(backend("insert snapshot", e)),
        }
    }

    #[instrument(skip(self), err)]
    async fn load(&self, identity: &str, step: u64) -> Result<Snapshot, CheckpointError> {
        let row: Option<PersistedSnapshot> = sqlx::query_as(
            r#"
            SELECT identity, step, digest, context_json, created_at
            FROM snapshots
            WHERE identity = ?1 AND step = ?2
            "#,
        )
        .bind(identity)
        .bind(step as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend("select snapshot", e))?;

        let snapshot = row
            .ok_or_else(|| CheckpointError::SnapshotNotFound {
                identity: identity.to_owned(),
                step,
            })?
            .into_snapshot()?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    async fn list_lineages(&self) -> Result<Vec<String>, CheckpointError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT identity FROM snapshots ORDER BY identity")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| backend("list lineages", e))?;
        Ok(rows.into_iter().map(|(identity,)| identity).collect())
    }

    async fn list_steps(&self, identity: &str) -> Result<Vec<u64>, CheckpointError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT step FROM snapshots WHERE identity = ?1 ORDER BY step")
                .bind(identity)
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| backend("list steps", e))?;
        Ok(rows.into_iter().map(|(step,)| step as u64).collect())
    }
}
