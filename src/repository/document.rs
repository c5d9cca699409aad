//! Document-store backend (SQLite)
//!
//! Buckets, members and metadata are separate collections. Bucket member ids
//! and relations are child rows with unique keys, so concurrent upserts of
//! the same bucket converge without duplicate entries.
//!
//! # Schema
//!
//! ```text
//! buckets           (stream_id, id, version) → flags, value, timestamp
//! bucket_members    (stream_id, id, version, member_id)
//! bucket_relations  (stream_id, id, version, edge) → relation JSON
//! members           id → member JSON
//! metadata          (kind, id) → JSON
//! ```
//!
//! `version` is the bucket timestamp, or `UNVERSIONED` for plain buckets.

use super::{Repository, TimeBound};
use crate::model::{
    Bucket, BucketId, EngineError, EngineResult, IndexValue, Member, Relation, UNVERSIONED,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS buckets (
        stream_id TEXT NOT NULL,
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        timestamp INTEGER,
        root INTEGER NOT NULL,
        leaf INTEGER NOT NULL,
        immutable INTEGER NOT NULL,
        value TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (stream_id, id, version)
    );
    CREATE INDEX IF NOT EXISTS idx_buckets_timestamp ON buckets(stream_id, id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_buckets_root ON buckets(stream_id, root);

    CREATE TABLE IF NOT EXISTS bucket_members (
        stream_id TEXT NOT NULL,
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        member_id TEXT NOT NULL,
        PRIMARY KEY (stream_id, id, version, member_id)
    );

    CREATE TABLE IF NOT EXISTS bucket_relations (
        stream_id TEXT NOT NULL,
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        edge TEXT NOT NULL,
        relation TEXT NOT NULL,
        PRIMARY KEY (stream_id, id, version, edge)
    );

    CREATE TABLE IF NOT EXISTS members (
        id TEXT PRIMARY KEY,
        document TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS metadata (
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        document TEXT NOT NULL,
        PRIMARY KEY (kind, id)
    );
";

const BUCKET_COLUMNS: &str =
    "id, version, timestamp, root, leaf, immutable, value, created_at, updated_at";

/// Raw `buckets` row before child rows are attached
struct BucketRow {
    key: String,
    version: i64,
    timestamp: Option<i64>,
    root: bool,
    leaf: bool,
    immutable: bool,
    value: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl BucketRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            version: row.get(1)?,
            timestamp: row.get(2)?,
            root: row.get(3)?,
            leaf: row.get(4)?,
            immutable: row.get(5)?,
            value: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

/// Uniqueness key of a relation row
fn edge_key(relation: &Relation) -> String {
    format!(
        "{}|{}|{}",
        relation.kind.as_str(),
        relation.target.to_key(),
        relation.timestamp_bound
    )
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// SQLite-backed repository
pub struct DocumentRepository {
    conn: Mutex<Connection>,
}

impl DocumentRepository {
    /// Create or open a database file
    pub fn new(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database
    pub fn in_memory() -> EngineResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            EngineError::BackendUnavailable(format!("Failed to acquire connection lock: {}", e))
        })
    }

    /// Attach member ids and relations to a bucket row
    fn hydrate(conn: &Connection, stream_id: &str, row: BucketRow) -> EngineResult<Bucket> {
        let mut bucket = Bucket::new(stream_id, BucketId::from_key(&row.key));
        bucket.timestamp = row.timestamp;
        bucket.root = row.root;
        bucket.leaf = row.leaf;
        bucket.immutable = row.immutable;
        bucket.value = match row.value {
            Some(json) => Some(serde_json::from_str::<IndexValue>(&json)?),
            None => None,
        };
        bucket.created_at = from_millis(row.created_at);
        bucket.updated_at = from_millis(row.updated_at);

        let mut stmt = conn.prepare_cached(
            "SELECT member_id FROM bucket_members
             WHERE stream_id = ?1 AND id = ?2 AND version = ?3",
        )?;
        let members = stmt.query_map(params![stream_id, row.key, row.version], |r| {
            r.get::<_, String>(0)
        })?;
        for member in members {
            bucket.members.insert(member?);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT relation FROM bucket_relations
             WHERE stream_id = ?1 AND id = ?2 AND version = ?3
             ORDER BY rowid",
        )?;
        let relations = stmt.query_map(params![stream_id, row.key, row.version], |r| {
            r.get::<_, String>(0)
        })?;
        for relation in relations {
            bucket.relations.push(serde_json::from_str(&relation?)?);
        }

        Ok(bucket)
    }

    fn query_one(
        conn: &Connection,
        stream_id: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> EngineResult<Option<Bucket>> {
        let row = conn
            .query_row(sql, params, BucketRow::from_row)
            .optional()?;
        row.map(|row| Self::hydrate(conn, stream_id, row)).transpose()
    }
}

#[async_trait]
impl Repository for DocumentRepository {
    fn backend(&self) -> &'static str {
        "document"
    }

    async fn open(&self) -> EngineResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Document store schema ready");
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        let conn = self.lock()?;
        // Fold the WAL back into the main file; no-op for in-memory databases
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    async fn find_metadata(&self, kind: &str, id: &str) -> EngineResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM metadata WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                |r| r.get(0),
            )
            .optional()?;
        document
            .map(|d| serde_json::from_str(&d).map_err(EngineError::from))
            .transpose()
    }

    async fn put_metadata(
        &self,
        kind: &str,
        id: &str,
        value: &serde_json::Value,
    ) -> EngineResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO metadata (kind, id, document) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind, id) DO UPDATE SET document = excluded.document",
            params![kind, id, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    async fn find_roots(&self, stream_id: &str) -> EngineResult<Vec<BucketId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT id FROM buckets WHERE stream_id = ?1 AND root = 1",
        )?;
        let keys = stmt.query_map(params![stream_id], |r| r.get::<_, String>(0))?;

        let mut roots = Vec::new();
        for key in keys {
            roots.push(BucketId::from_key(&key?));
        }
        roots.sort();
        Ok(roots)
    }

    async fn find_bucket(&self, stream_id: &str, id: &BucketId) -> EngineResult<Option<Bucket>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM buckets WHERE stream_id = ?1 AND id = ?2 AND version = ?3",
            BUCKET_COLUMNS
        );
        Self::query_one(&conn, stream_id, &sql, params![stream_id, id.to_key(), UNVERSIONED])
    }

    async fn find_bucket_version(
        &self,
        stream_id: &str,
        id: &BucketId,
        bound: TimeBound,
    ) -> EngineResult<Option<Bucket>> {
        let (op, at, order) = match bound {
            TimeBound::Latest => ("<=", i64::MAX, "DESC"),
            TimeBound::AtOrBefore(t) => ("<=", t, "DESC"),
            TimeBound::Before(t) => ("<", t, "DESC"),
            TimeBound::After(t) => (">", t, "ASC"),
        };

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM buckets
             WHERE stream_id = ?1 AND id = ?2 AND timestamp IS NOT NULL AND timestamp {} ?3
             ORDER BY timestamp {} LIMIT 1",
            BUCKET_COLUMNS, op, order
        );
        Self::query_one(&conn, stream_id, &sql, params![stream_id, id.to_key(), at])
    }

    async fn find_stream_buckets(&self, stream_id: &str) -> EngineResult<Vec<Bucket>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM buckets WHERE stream_id = ?1 ORDER BY id, version",
            BUCKET_COLUMNS
        );

        let rows = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![stream_id], BucketRow::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|row| Self::hydrate(&conn, stream_id, row))
            .collect()
    }

    async fn find_members(&self, ids: &[String]) -> EngineResult<Vec<Member>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT document FROM members WHERE id = ?1")?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let document: Option<String> =
                stmt.query_row(params![id], |r| r.get(0)).optional()?;
            if let Some(document) = document {
                members.push(serde_json::from_str(&document)?);
            }
        }
        Ok(members)
    }

    async fn upsert_bucket(&self, bucket: &Bucket) -> EngineResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = bucket.id.to_key();
        let version = bucket.version();
        let value = bucket
            .value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            "INSERT INTO buckets
                (stream_id, id, version, timestamp, root, leaf, immutable, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(stream_id, id, version) DO UPDATE SET
                root = MAX(root, excluded.root),
                leaf = MAX(leaf, excluded.leaf),
                immutable = MAX(immutable, excluded.immutable),
                value = COALESCE(value, excluded.value),
                created_at = MIN(created_at, excluded.created_at),
                updated_at = MAX(updated_at, excluded.updated_at)",
            params![
                bucket.stream_id,
                key,
                version,
                bucket.timestamp,
                bucket.root,
                bucket.leaf,
                bucket.immutable,
                value,
                bucket.created_at.timestamp_millis(),
                bucket.updated_at.timestamp_millis(),
            ],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO bucket_members (stream_id, id, version, member_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for member in &bucket.members {
                stmt.execute(params![bucket.stream_id, key, version, member])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO bucket_relations (stream_id, id, version, edge, relation)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for relation in &bucket.relations {
                stmt.execute(params![
                    bucket.stream_id,
                    key,
                    version,
                    edge_key(relation),
                    serde_json::to_string(relation)?
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn insert_member(&self, member: &Member) -> EngineResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO members (id, document) VALUES (?1, ?2)",
            params![member.id, serde_json::to_string(member)?],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationType;
    use crate::repository::contract;

    #[tokio::test]
    async fn test_document_bucket_contract() {
        let repo = DocumentRepository::in_memory().unwrap();
        contract::roundtrip_buckets(&repo).await;
    }

    #[tokio::test]
    async fn test_document_versions() {
        let repo = DocumentRepository::in_memory().unwrap();
        contract::versions(&repo).await;
    }

    #[tokio::test]
    async fn test_document_members_and_metadata() {
        let repo = DocumentRepository::in_memory().unwrap();
        contract::members_and_metadata(&repo).await;
    }

    #[tokio::test]
    async fn test_document_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragmenta.db");

        {
            let repo = DocumentRepository::new(&path).unwrap();
            repo.open().await.unwrap();
            let mut bucket = contract::bucket("1", None);
            bucket.add_member("m1");
            repo.upsert_bucket(&bucket).await.unwrap();
            repo.close().await.unwrap();
        }

        let repo = DocumentRepository::new(&path).unwrap();
        repo.open().await.unwrap();
        let bucket = repo
            .find_bucket("s", &BucketId::from_key("1"))
            .await
            .unwrap()
            .unwrap();
        assert!(bucket.members.contains("m1"));
    }

    #[tokio::test]
    async fn test_document_relation_rows_are_unique() {
        let repo = DocumentRepository::in_memory().unwrap();
        repo.open().await.unwrap();

        let mut bucket = contract::bucket("1", None);
        bucket.add_relation(Relation::new(
            RelationType::EqualTo,
            BucketId::from_key("01"),
            &IndexValue::from_key("1"),
        ));
        // Two writers racing on the same bucket
        repo.upsert_bucket(&bucket).await.unwrap();
        repo.upsert_bucket(&bucket).await.unwrap();

        let conn = repo.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bucket_relations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
