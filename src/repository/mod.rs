//! Repository Backends
//!
//! Persistence contract the engine is written against, with three
//! implementations selected by configuration:
//!
//! - **memory**: index tree + buckets in process memory
//! - **document**: SQLite collections for buckets, members and metadata
//! - **search**: key-value store with a secondary search index, snapshotted
//!   to disk
//!
//! Absence is never an error: lookups return `None` or an empty list.
//!
//! # Upsert semantics
//!
//! ```text
//! upsert_bucket(b):  stored = stored ⊕ b   (Bucket::merge)
//! insert_member(m):  first write wins
//! ```

mod document;
mod memory;
mod search;

pub use document::DocumentRepository;
pub use memory::MemoryRepository;
pub use search::SearchRepository;

use crate::config::{BackendKind, RepositoryConfig};
use crate::model::{Bucket, BucketId, EngineResult, Member};
use async_trait::async_trait;
use std::sync::Arc;

/// Which timestamp version of a bucket to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    /// Most recent version
    Latest,
    /// Most recent version with `timestamp <= t`
    AtOrBefore(i64),
    /// Most recent version with `timestamp < t`
    Before(i64),
    /// Oldest version with `timestamp > t`
    After(i64),
}

impl TimeBound {
    /// Whether a version timestamp satisfies the bound
    pub fn admits(&self, timestamp: i64) -> bool {
        match self {
            TimeBound::Latest => true,
            TimeBound::AtOrBefore(t) => timestamp <= *t,
            TimeBound::Before(t) => timestamp < *t,
            TimeBound::After(t) => timestamp > *t,
        }
    }

    /// Whether the best match is the newest admitted version (else the oldest)
    pub fn newest_first(&self) -> bool {
        !matches!(self, TimeBound::After(_))
    }
}

/// Storage contract for buckets, members and stream metadata
#[async_trait]
pub trait Repository: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Prepare storage (create files, tables, load snapshots)
    async fn open(&self) -> EngineResult<()>;

    /// Flush and release resources
    async fn close(&self) -> EngineResult<()>;

    /// Small metadata blob stored under `(kind, id)`
    async fn find_metadata(&self, kind: &str, id: &str) -> EngineResult<Option<serde_json::Value>>;

    async fn put_metadata(&self, kind: &str, id: &str, value: &serde_json::Value)
        -> EngineResult<()>;

    /// Ids of the root buckets of a stream, sorted
    async fn find_roots(&self, stream_id: &str) -> EngineResult<Vec<BucketId>>;

    /// Unversioned bucket by exact id
    async fn find_bucket(&self, stream_id: &str, id: &BucketId) -> EngineResult<Option<Bucket>>;

    /// Timestamp version of a bucket
    async fn find_bucket_version(
        &self,
        stream_id: &str,
        id: &BucketId,
        bound: TimeBound,
    ) -> EngineResult<Option<Bucket>>;

    /// Every bucket of a stream (all versions)
    async fn find_stream_buckets(&self, stream_id: &str) -> EngineResult<Vec<Bucket>>;

    /// Members by id, in request order; unknown ids are dropped
    async fn find_members(&self, ids: &[String]) -> EngineResult<Vec<Member>>;

    /// Create or merge a bucket
    async fn upsert_bucket(&self, bucket: &Bucket) -> EngineResult<()>;

    /// Store a member unless its id exists
    async fn insert_member(&self, member: &Member) -> EngineResult<()>;
}

/// Open the backend selected by configuration
pub fn open_repository(config: &RepositoryConfig) -> EngineResult<Arc<dyn Repository>> {
    let repository: Arc<dyn Repository> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryRepository::new()),
        BackendKind::Document => Arc::new(DocumentRepository::new(
            config.data_path().join("fragmenta.db"),
        )?),
        BackendKind::Search => Arc::new(SearchRepository::new(
            config.data_path().join("search.snapshot"),
        )),
    };

    tracing::info!(
        backend = repository.backend(),
        data_dir = %config.data_dir,
        "Selected repository backend"
    );

    Ok(repository)
}

/// Shared contract checks run against every backend
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::model::{IndexValue, Relation, RelationType, Term};

    pub fn bucket(key: &str, timestamp: Option<i64>) -> Bucket {
        let id = BucketId::from_key(key);
        let mut bucket = Bucket::new("s", id.clone());
        bucket.root = id.depth() == 1 && timestamp.is_none();
        bucket.leaf = true;
        bucket.value = id.last().map(IndexValue::from_key);
        bucket.timestamp = timestamp;
        bucket
    }

    pub async fn roundtrip_buckets(repo: &dyn Repository) {
        repo.open().await.unwrap();

        let mut first = bucket("1", None);
        first.add_member("m1");
        repo.upsert_bucket(&first).await.unwrap();

        let mut second = bucket("1", None);
        second.add_member("m2");
        second.add_member("m1");
        second.immutable = true;
        second.add_relation(Relation::new(
            RelationType::EqualTo,
            BucketId::from_key("01"),
            &IndexValue::from_key("1"),
        ));
        repo.upsert_bucket(&second).await.unwrap();
        repo.upsert_bucket(&second).await.unwrap();

        let stored = repo
            .find_bucket("s", &BucketId::from_key("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.members.len(), 2);
        assert_eq!(stored.relations.len(), 1);
        assert!(stored.immutable);
        assert!(stored.root);
        assert_eq!(stored.value, Some(IndexValue::from_key("1")));

        assert!(repo
            .find_bucket("s", &BucketId::from_key("2"))
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_bucket("other", &BucketId::from_key("1"))
            .await
            .unwrap()
            .is_none());

        repo.upsert_bucket(&bucket("1/2", None)).await.unwrap();
        repo.upsert_bucket(&bucket("3", None)).await.unwrap();
        let roots = repo.find_roots("s").await.unwrap();
        assert_eq!(roots, vec![BucketId::from_key("1"), BucketId::from_key("3")]);

        let all = repo.find_stream_buckets("s").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    async fn version_at(repo: &dyn Repository, bound: TimeBound) -> Option<i64> {
        repo.find_bucket_version("s", &BucketId::from_key("a"), bound)
            .await
            .unwrap()
            .and_then(|b| b.timestamp)
    }

    pub async fn versions(repo: &dyn Repository) {
        repo.open().await.unwrap();
        for t in [3000, 1000, 2000] {
            repo.upsert_bucket(&bucket("a", Some(t))).await.unwrap();
        }

        assert_eq!(version_at(repo, TimeBound::Latest).await, Some(3000));
        assert_eq!(version_at(repo, TimeBound::AtOrBefore(2000)).await, Some(2000));
        assert_eq!(version_at(repo, TimeBound::AtOrBefore(1500)).await, Some(1000));
        assert_eq!(version_at(repo, TimeBound::AtOrBefore(999)).await, None);
        assert_eq!(version_at(repo, TimeBound::Before(2000)).await, Some(1000));
        assert_eq!(version_at(repo, TimeBound::After(2000)).await, Some(3000));
        assert_eq!(version_at(repo, TimeBound::After(3000)).await, None);

        // Versions are not unversioned buckets
        let id = BucketId::from_key("a");
        assert!(repo.find_bucket("s", &id).await.unwrap().is_none());
    }

    pub async fn members_and_metadata(repo: &dyn Repository) {
        repo.open().await.unwrap();

        let m1 = Member::new("m1").with("http://example.org/x", Term::literal("1"));
        let m2 = Member::new("m2").with("http://example.org/x", Term::literal("2"));
        repo.insert_member(&m1).await.unwrap();
        repo.insert_member(&m2).await.unwrap();

        let changed = Member::new("m1").with("http://example.org/x", Term::literal("9"));
        repo.insert_member(&changed).await.unwrap();

        let ids = vec!["m2".to_string(), "missing".to_string(), "m1".to_string()];
        let found = repo.find_members(&ids).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "m2");
        assert_eq!(found[1], m1);

        assert!(repo.find_metadata("stream", "s").await.unwrap().is_none());
        let blob = serde_json::json!({"levels": 2});
        repo.put_metadata("stream", "s", &blob).await.unwrap();
        assert_eq!(repo.find_metadata("stream", "s").await.unwrap(), Some(blob));
    }
}
