use agentdb_types::{AgentDbError, Cid};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::{BackendError, BlockBackend};

/// Content-addressed block repository backed by SQLite.
///
/// Acts as a local node: addresses are computed from the bytes, so `put` is
/// idempotent and the stored CID is globally meaningful.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Arc<SqlitePool>,
}

impl SqliteBackend {
    /// Open or create the database. `:memory:` gives a private in-memory repository.
    pub async fn open(db_path: &str) -> Result<Self, AgentDbError> {
        // Each in-memory connection is a separate database, so keep exactly one.
        let max_connections = if db_path == ":memory:" { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await
            .map_err(|e| AgentDbError::Storage(e.to_string()))?;

        let backend = Self {
            pool: Arc::new(pool),
        };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> Result<(), AgentDbError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                cid TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| AgentDbError::Storage(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocks_created ON blocks(created_at)")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| AgentDbError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Number of distinct blocks held.
    pub async fn block_count(&self) -> Result<i64, AgentDbError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| AgentDbError::Storage(e.to_string()))
    }

    /// Most recently stored CIDs, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Cid>, AgentDbError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT cid FROM blocks ORDER BY created_at DESC, cid LIMIT ?")
                .bind(limit)
                .fetch_all(self.pool.as_ref())
                .await
                .map_err(|e| AgentDbError::Storage(e.to_string()))?;
        rows.into_iter().map(|(cid,)| Cid::parse(&cid)).collect()
    }
}

#[async_trait]
impl BlockBackend for SqliteBackend {
    async fn put(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<Cid, BackendError> {
        let cid = Cid::for_bytes(bytes);
        let now = chrono::Utc::now().timestamp();

        // Insert block (ignore if duplicate)
        sqlx::query(
            "INSERT OR IGNORE INTO blocks (cid, filename, mime_type, size, data, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(cid.as_str())
        .bind(filename)
        .bind(mime_type)
        .bind(bytes.len() as i64)
        .bind(bytes)
        .bind(now)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| BackendError::Transient(e.to_string()))?;

        Ok(cid)
    }

    async fn get(&self, cid: &Cid, _filename: &str) -> Result<Vec<u8>, BackendError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM blocks WHERE cid = ?")
            .bind(cid.as_str())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        row.map(|(data,)| data).ok_or(BackendError::NotFound)
    }
}
