//! SQLite storage adapter
//!
//! Records are persisted as JSON with a handful of projected columns for
//! indexed lookups. Similarity search is a scan over the rows selected by the
//! filter; this is adequate for single-node deployments with tens of
//! thousands of records.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use super::{GraphNeighbor, StorageAdapter, WriteOp};
use crate::error::{Error, Result};
use crate::filter::RecordFilter;
use crate::types::{MemoryRecord, RelationType};

/// Storage adapter backed by a SQLite database.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("migrations/001_memory_records.sql"))?;
        conn.execute_batch(include_str!("migrations/002_active_content_unique.sql"))?;
        tracing::debug!("SQLite memory storage initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for json in rows {
        records.push(serde_json::from_str(&json?)?);
    }
    Ok(records)
}

/// Rows that may match `filter`, narrowed in SQL by user where possible.
fn load_matching(conn: &Connection, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
    let candidates = match (&filter.user_id, filter.include_shared_scopes) {
        (Some(user_id), false) => query_records(
            conn,
            "SELECT record_json FROM memory_records WHERE user_id = ?1",
            params![user_id],
        )?,
        (Some(user_id), true) => query_records(
            conn,
            "SELECT record_json FROM memory_records
             WHERE user_id = ?1 OR scope IN ('group', 'system')",
            params![user_id],
        )?,
        (None, _) => query_records(conn, "SELECT record_json FROM memory_records", [])?,
    };
    Ok(candidates.into_iter().filter(|r| filter.matches(r)).collect())
}

fn load_all(conn: &Connection) -> Result<HashMap<String, MemoryRecord>> {
    Ok(
        query_records(conn, "SELECT record_json FROM memory_records", [])?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect(),
    )
}

fn stored_version(conn: &Connection, id: &str) -> Result<Option<u64>> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM memory_records WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

/// Message raised by the insert trigger in `002_active_content_unique.sql`.
const DUPLICATE_CONTENT: &str = "duplicate active content";

fn insert_record(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO memory_records
            (id, user_id, agent_id, run_id, scope, status, content_hash, created_at, version, record_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &record.id,
            &record.owner.user_id,
            &record.owner.agent_id,
            &record.owner.run_id,
            record.scope.as_str(),
            record.status.as_str(),
            &record.content_hash,
            record.created_at.timestamp_millis(),
            record.version as i64,
            serde_json::to_string(record)?,
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, Some(message)))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains(DUPLICATE_CONTENT) =>
        {
            Err(Error::DuplicateContent {
                content_hash: record.content_hash.clone(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Id of an active record with the same owner and content as `record`.
fn active_duplicate_id(conn: &Connection, record: &MemoryRecord) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM memory_records
             WHERE user_id = ?1 AND agent_id IS ?2 AND content_hash = ?3 AND status = 'active'
             LIMIT 1",
            params![&record.owner.user_id, &record.owner.agent_id, &record.content_hash],
            |row| row.get(0),
        )
        .optional()?)
}

fn create_in(conn: &Connection, mut record: MemoryRecord) -> Result<MemoryRecord> {
    if stored_version(conn, &record.id)?.is_some() {
        return Err(Error::AlreadyExists(record.id));
    }
    if record.is_active() {
        if let Some(existing_id) = active_duplicate_id(conn, &record)? {
            tracing::debug!(memory_id = %record.id, existing_id = %existing_id, "Rejected duplicate content");
            return Err(Error::DuplicateContent {
                content_hash: record.content_hash,
            });
        }
    }
    record.version = 1;
    insert_record(conn, &record)?;
    Ok(record)
}

fn update_in(conn: &Connection, mut record: MemoryRecord, expected_version: u64) -> Result<MemoryRecord> {
    record.version = expected_version + 1;
    let changed = conn.execute(
        "UPDATE memory_records
         SET user_id = ?2, agent_id = ?3, run_id = ?4, scope = ?5, status = ?6,
             content_hash = ?7, version = ?8, record_json = ?9
         WHERE id = ?1 AND version = ?10",
        params![
            &record.id,
            &record.owner.user_id,
            &record.owner.agent_id,
            &record.owner.run_id,
            record.scope.as_str(),
            record.status.as_str(),
            &record.content_hash,
            record.version as i64,
            serde_json::to_string(&record)?,
            expected_version as i64,
        ],
    )?;

    if changed == 0 {
        return match stored_version(conn, &record.id)? {
            Some(actual) => Err(Error::version_conflict(&record.id, expected_version, actual)),
            None => Err(Error::NotFound(record.id)),
        };
    }
    Ok(record)
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn create(&self, record: MemoryRecord) -> Result<MemoryRecord> {
        let conn = self.conn.lock().await;
        create_in(&conn, record)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM memory_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    async fn update(&self, record: MemoryRecord, expected_version: u64) -> Result<MemoryRecord> {
        let conn = self.conn.lock().await;
        update_in(&conn, record, expected_version)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM memory_records WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        Ok(super::page(load_matching(&conn, filter)?, limit, offset))
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>> {
        let conn = self.conn.lock().await;
        let candidates = load_matching(&conn, filter)?;
        Ok(super::rank_by_vector(embedding, k, candidates.iter()))
    }

    async fn text_search(
        &self,
        query: &str,
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f64)>> {
        let conn = self.conn.lock().await;
        let candidates = load_matching(&conn, filter)?;
        Ok(super::rank_by_text(query, k, candidates.iter()))
    }

    async fn graph_neighbors(
        &self,
        id: &str,
        relation_types: &[RelationType],
        max_hops: usize,
        max_nodes: usize,
    ) -> Result<Vec<GraphNeighbor>> {
        let conn = self.conn.lock().await;
        let records = load_all(&conn)?;
        Ok(super::traverse(&records, id, relation_types, max_hops, max_nodes))
    }

    async fn find_by_hash(
        &self,
        filter: &RecordFilter,
        hash: &str,
    ) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let candidates = query_records(
            &conn,
            "SELECT record_json FROM memory_records WHERE content_hash = ?1
             ORDER BY created_at ASC, id ASC",
            params![hash],
        )?;
        Ok(candidates.into_iter().find(|r| filter.matches(r)))
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<Vec<MemoryRecord>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut written = Vec::with_capacity(ops.len());
        for op in ops {
            let record = match op {
                WriteOp::Create(record) => create_in(&tx, record)?,
                WriteOp::Update {
                    record,
                    expected_version,
                } => update_in(&tx, record, expected_version)?,
            };
            written.push(record);
        }
        tx.commit()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_get_update() {
        contract::create_get_update(&SqliteStorage::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        contract::list_filters_and_pages(&SqliteStorage::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_searches() {
        contract::searches(&SqliteStorage::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_rejects_duplicate_active_content() {
        contract::rejects_duplicate_active_content(&SqliteStorage::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_duplicate_insert_from_second_connection_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memories.db");
        let storage = SqliteStorage::open(&path).unwrap();
        storage
            .create(contract::record("likes dark roast coffee", "u1"))
            .await
            .unwrap();

        // A writer that skipped the pre-insert check still hits the trigger.
        let other = Connection::open(&path).unwrap();
        let mut twin = contract::record("likes dark roast coffee", "u1");
        twin.version = 1;
        let err = insert_record(&other, &twin).unwrap_err();
        assert!(matches!(err, Error::DuplicateContent { .. }));

        let active = storage
            .list(&RecordFilter::for_user("u1"), 10, 0)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_and_batch() {
        contract::graph_and_batch(&SqliteStorage::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memories.db");

        let created = {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.create(contract::record("likes tea", "u1")).await.unwrap()
        };

        let reopened = SqliteStorage::open(&path).unwrap();
        let fetched = reopened.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }
}
