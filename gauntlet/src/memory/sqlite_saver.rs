//! SQLite-backed checkpointer (SqliteSaver). Persistent across process restarts.
//!
//! One row per checkpoint keyed by `(run_id, seq)`; the state is stored as a serialized
//! payload. Blocking rusqlite calls run on `spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::state::ResearchState;

use super::checkpoint::{Checkpoint, CheckpointError, Checkpointer};
use super::serializer::{JsonSerializer, Serializer};

fn storage(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

type Row = (String, i64, String, String, Vec<u8>);

/// SQLite checkpointer.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer>` by the engine; the CLI opens the same
/// file read-only for inspection.
pub struct SqliteSaver {
    db_path: PathBuf,
    serializer: Arc<dyn Serializer<ResearchState>>,
}

impl std::fmt::Debug for SqliteSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSaver")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteSaver {
    /// Opens (or creates) the database with the JSON serializer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        Self::new(path, Arc::new(JsonSerializer))
    }

    /// Creates the checkpointer and ensures the table exists.
    pub fn new(
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer<ResearchState>>,
    ) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (run_id, seq)
            )
            "#,
            [],
        )
        .map_err(storage)?;
        Ok(Self {
            db_path,
            serializer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn decode(&self, row: Row) -> Result<Checkpoint, CheckpointError> {
        let (run_id, seq, node_id, timestamp, payload) = row;
        Ok(Checkpoint {
            run_id,
            sequence_number: u64::try_from(seq).map_err(storage)?,
            node_id,
            state: self.serializer.deserialize(&payload)?,
            timestamp,
        })
    }

    async fn query(&self, sql: &'static str, run_id: &str) -> Result<Vec<Row>, CheckpointError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Row>, CheckpointError> {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let mut stmt = conn.prepare(sql).map_err(storage)?;
            let rows = stmt
                .query_map(params![run_id], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
                })
                .map_err(storage)?;
            rows.collect::<Result<Vec<Row>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)?
    }
}

#[async_trait]
impl Checkpointer for SqliteSaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if checkpoint.run_id.is_empty() {
            return Err(CheckpointError::RunIdRequired);
        }
        let payload = self.serializer.serialize(&checkpoint.state)?;
        let seq = i64::try_from(checkpoint.sequence_number).map_err(storage)?;
        let run_id = checkpoint.run_id.clone();
        let node_id = checkpoint.node_id.clone();
        let ts = checkpoint.timestamp.clone();
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), CheckpointError> {
            let mut conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let tx = conn.transaction().map_err(storage)?;
            let latest: Option<i64> = tx
                .query_row(
                    "SELECT MAX(seq) FROM checkpoints WHERE run_id = ?1",
                    params![run_id],
                    |r| r.get(0),
                )
                .map_err(storage)?;
            if let Some(latest) = latest {
                if seq <= latest {
                    return Err(CheckpointError::NonMonotonic {
                        run_id,
                        latest: latest as u64,
                        attempted: seq as u64,
                    });
                }
            }
            tx.execute(
                "INSERT INTO checkpoints (run_id, seq, node_id, ts, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, seq, node_id, ts, payload],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)
        })
        .await
        .map_err(storage)?
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let db_path = self.db_path.clone();
        let run = run_id.to_string();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<Row>, CheckpointError> {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            conn.query_row(
                "SELECT run_id, seq, node_id, ts, payload FROM checkpoints
                 WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![run],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()
            .map_err(storage)
        })
        .await
        .map_err(storage)??;
        row.map(|r| self.decode(r)).transpose()
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = self
            .query(
                "SELECT run_id, seq, node_id, ts, payload FROM checkpoints
                 WHERE run_id = ?1 ORDER BY seq ASC",
                run_id,
            )
            .await?;
        rows.into_iter().map(|r| self.decode(r)).collect()
    }

    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, CheckpointError> {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let mut stmt = conn
                .prepare("SELECT DISTINCT run_id FROM checkpoints ORDER BY run_id")
                .map_err(storage)?;
            let ids = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(storage)?;
            ids.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)?
    }
}
