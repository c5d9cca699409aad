//! Search-indexed key-value backend
//!
//! Buckets are stored as hashes, their member ids and relations as set-valued
//! keys, members and metadata as string keys. A secondary index answers the
//! queries the engine needs without scanning:
//!
//! - **term index**: `streamId`, `id`, `root`, `immutable` → bucket keys
//! - **range index**: `(streamId, id)` → timestamp → bucket key
//!
//! Nested values (relations, index values, members) are stored as JSON
//! strings since neither the store nor the index holds nested objects.
//!
//! # Snapshot format
//!
//! ```text
//! +---------+-----------------+---------+
//! | len u32 | bincode(state)  | crc u32 |
//! +---------+-----------------+---------+
//! ```
//!
//! Written on `close` / [`SearchRepository::persist`], loaded on `open`.

use super::{Repository, TimeBound};
use crate::model::{Bucket, BucketId, EngineError, EngineResult, Member, Relation, UNVERSIONED};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Flat key-value data
#[derive(Debug, Default, Serialize, Deserialize)]
struct KvState {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    strings: HashMap<String, String>,
}

/// Secondary index over bucket hashes
#[derive(Debug, Default, Serialize, Deserialize)]
struct SearchIndex {
    terms: HashMap<String, BTreeSet<String>>,
    /// Terms each document is currently filed under
    doc_terms: HashMap<String, Vec<String>>,
    ranges: HashMap<String, BTreeMap<i64, String>>,
}

impl SearchIndex {
    fn term(field: &str, value: &str) -> String {
        format!("{}={}", field, value)
    }

    fn series(stream_id: &str, id: &BucketId) -> String {
        format!("{}\u{1f}{}", urlencoding::encode(stream_id), id.to_key())
    }

    /// (Re)file a bucket document under its current field values
    fn index(&mut self, doc: &str, bucket: &Bucket) {
        if let Some(old) = self.doc_terms.remove(doc) {
            for term in old {
                if let Some(docs) = self.terms.get_mut(&term) {
                    docs.remove(doc);
                }
            }
        }

        let terms = vec![
            Self::term("streamId", &bucket.stream_id),
            Self::term("id", &bucket.id.to_key()),
            Self::term("root", if bucket.root { "1" } else { "0" }),
            Self::term("immutable", if bucket.immutable { "1" } else { "0" }),
        ];
        for term in &terms {
            self.terms
                .entry(term.clone())
                .or_default()
                .insert(doc.to_string());
        }
        self.doc_terms.insert(doc.to_string(), terms);

        if let Some(ts) = bucket.timestamp {
            self.ranges
                .entry(Self::series(&bucket.stream_id, &bucket.id))
                .or_default()
                .insert(ts, doc.to_string());
        }
    }

    /// Documents matching every `(field, value)` pair
    fn query(&self, clauses: &[(&str, &str)]) -> BTreeSet<String> {
        let mut result: Option<BTreeSet<String>> = None;
        for (field, value) in clauses {
            let docs = self
                .terms
                .get(&Self::term(field, value))
                .cloned()
                .unwrap_or_default();
            result = Some(match result {
                Some(acc) => acc.intersection(&docs).cloned().collect(),
                None => docs,
            });
        }
        result.unwrap_or_default()
    }

    fn range(&self, stream_id: &str, id: &BucketId, bound: TimeBound) -> Option<&String> {
        let versions = self.ranges.get(&Self::series(stream_id, id))?;
        let found = match bound {
            TimeBound::Latest => versions.iter().next_back(),
            TimeBound::AtOrBefore(t) => versions.range(..=t).next_back(),
            TimeBound::Before(t) => versions.range(..t).next_back(),
            TimeBound::After(t) => versions.range(t.saturating_add(1)..).next(),
        };
        found.map(|(_, doc)| doc)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SearchState {
    kv: KvState,
    index: SearchIndex,
}

impl SearchState {
    /// Key parts are percent-encoded so `:` only ever separates them
    fn doc_key(stream_id: &str, id: &BucketId, version: i64) -> String {
        format!(
            "bucket:{}:{}:{}",
            urlencoding::encode(stream_id),
            id.to_key(),
            version
        )
    }

    fn metadata_key(kind: &str, id: &str) -> String {
        format!(
            "metadata:{}:{}",
            urlencoding::encode(kind),
            urlencoding::encode(id)
        )
    }

    fn load_bucket(&self, doc: &str) -> EngineResult<Option<Bucket>> {
        let Some(hash) = self.kv.hashes.get(doc) else {
            return Ok(None);
        };

        let field = |name: &str| {
            hash.get(name).ok_or_else(|| {
                EngineError::Corruption(format!("bucket {} lacks field {}", doc, name))
            })
        };
        let flag = |name: &str| field(name).map(|v| v == "1");
        let millis = |name: &str| -> EngineResult<DateTime<Utc>> {
            let raw = field(name)?;
            raw.parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| EngineError::Corruption(format!("bad {} '{}'", name, raw)))
        };

        let mut bucket = Bucket::new(
            field("streamId")?.clone(),
            BucketId::from_key(field("id")?),
        );
        bucket.root = flag("root")?;
        bucket.leaf = flag("leaf")?;
        bucket.immutable = flag("immutable")?;
        bucket.timestamp = hash.get("timestamp").and_then(|t| t.parse().ok());
        bucket.value = match hash.get("value") {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };
        bucket.created_at = millis("createdAt")?;
        bucket.updated_at = millis("updatedAt")?;

        if let Some(members) = self.kv.sets.get(&format!("{}:members", doc)) {
            bucket.members = members.clone();
        }
        if let Some(relations) = self.kv.sets.get(&format!("{}:relations", doc)) {
            for json in relations {
                bucket.add_relation(serde_json::from_str::<Relation>(json)?);
            }
        }

        Ok(Some(bucket))
    }

    fn store_bucket(&mut self, doc: &str, bucket: &Bucket) -> EngineResult<()> {
        let mut hash = HashMap::new();
        hash.insert("streamId".to_string(), bucket.stream_id.clone());
        hash.insert("id".to_string(), bucket.id.to_key());
        hash.insert("root".to_string(), (bucket.root as u8).to_string());
        hash.insert("leaf".to_string(), (bucket.leaf as u8).to_string());
        hash.insert("immutable".to_string(), (bucket.immutable as u8).to_string());
        if let Some(ts) = bucket.timestamp {
            hash.insert("timestamp".to_string(), ts.to_string());
        }
        if let Some(value) = &bucket.value {
            hash.insert("value".to_string(), serde_json::to_string(value)?);
        }
        hash.insert(
            "createdAt".to_string(),
            bucket.created_at.timestamp_millis().to_string(),
        );
        hash.insert(
            "updatedAt".to_string(),
            bucket.updated_at.timestamp_millis().to_string(),
        );
        self.kv.hashes.insert(doc.to_string(), hash);

        self.kv
            .sets
            .insert(format!("{}:members", doc), bucket.members.clone());

        let relations = bucket
            .relations
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<BTreeSet<_>, _>>()?;
        self.kv.sets.insert(format!("{}:relations", doc), relations);

        self.index.index(doc, bucket);
        Ok(())
    }
}

/// Key-value repository with a secondary search index
pub struct SearchRepository {
    path: PathBuf,
    state: RwLock<SearchState>,
}

impl SearchRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: RwLock::new(SearchState::default()),
        }
    }

    /// Write the snapshot file
    pub async fn persist(&self) -> EngineResult<()> {
        let state = self.state.read().await;
        let data = bincode::serialize(&*state)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&(data.len() as u32).to_le_bytes());
        hasher.update(&data);
        let crc = hasher.finalize();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write to a sibling file, then rename over the old snapshot
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&(data.len() as u32).to_le_bytes())?;
            file.write_all(&data)?;
            file.write_all(&crc.to_le_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = ?self.path, bytes = data.len(), "Persisted search snapshot");
        Ok(())
    }

    fn read_snapshot(path: &Path) -> EngineResult<SearchState> {
        let mut file = std::fs::File::open(path)?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        file.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(EngineError::Corruption(format!(
                "snapshot checksum mismatch: expected {:08x}, got {:08x}",
                stored_crc, computed_crc
            )));
        }

        Ok(bincode::deserialize(&data)?)
    }
}

#[async_trait]
impl Repository for SearchRepository {
    fn backend(&self) -> &'static str {
        "search"
    }

    async fn open(&self) -> EngineResult<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let loaded = Self::read_snapshot(&self.path)?;
        tracing::info!(
            path = ?self.path,
            buckets = loaded.kv.hashes.len(),
            "Loaded search snapshot"
        );
        *self.state.write().await = loaded;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.persist().await
    }

    async fn find_metadata(&self, kind: &str, id: &str) -> EngineResult<Option<serde_json::Value>> {
        let state = self.state.read().await;
        state
            .kv
            .strings
            .get(&SearchState::metadata_key(kind, id))
            .map(|json| serde_json::from_str(json).map_err(EngineError::from))
            .transpose()
    }

    async fn put_metadata(
        &self,
        kind: &str,
        id: &str,
        value: &serde_json::Value,
    ) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.kv.strings.insert(
            SearchState::metadata_key(kind, id),
            serde_json::to_string(value)?,
        );
        Ok(())
    }

    async fn find_roots(&self, stream_id: &str) -> EngineResult<Vec<BucketId>> {
        let state = self.state.read().await;
        let mut roots: Vec<BucketId> = state
            .index
            .query(&[("streamId", stream_id), ("root", "1")])
            .iter()
            .filter_map(|doc| state.kv.hashes.get(doc))
            .filter_map(|hash| hash.get("id"))
            .map(|key| BucketId::from_key(key.as_str()))
            .collect();
        roots.sort();
        roots.dedup();
        Ok(roots)
    }

    async fn find_bucket(&self, stream_id: &str, id: &BucketId) -> EngineResult<Option<Bucket>> {
        let state = self.state.read().await;
        state.load_bucket(&SearchState::doc_key(stream_id, id, UNVERSIONED))
    }

    async fn find_bucket_version(
        &self,
        stream_id: &str,
        id: &BucketId,
        bound: TimeBound,
    ) -> EngineResult<Option<Bucket>> {
        let state = self.state.read().await;
        match state.index.range(stream_id, id, bound) {
            Some(doc) => state.load_bucket(doc),
            None => Ok(None),
        }
    }

    async fn find_stream_buckets(&self, stream_id: &str) -> EngineResult<Vec<Bucket>> {
        let state = self.state.read().await;
        let mut buckets = Vec::new();
        for doc in state.index.query(&[("streamId", stream_id)]) {
            if let Some(bucket) = state.load_bucket(&doc)? {
                buckets.push(bucket);
            }
        }
        Ok(buckets)
    }

    async fn find_members(&self, ids: &[String]) -> EngineResult<Vec<Member>> {
        let state = self.state.read().await;
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(json) = state.kv.strings.get(&format!("member:{}", id)) {
                members.push(serde_json::from_str(json)?);
            }
        }
        Ok(members)
    }

    async fn upsert_bucket(&self, bucket: &Bucket) -> EngineResult<()> {
        let mut state = self.state.write().await;
        let doc = SearchState::doc_key(&bucket.stream_id, &bucket.id, bucket.version());

        let merged = match state.load_bucket(&doc)? {
            Some(mut stored) => {
                stored.merge(bucket);
                stored
            }
            None => bucket.clone(),
        };
        state.store_bucket(&doc, &merged)
    }

    async fn insert_member(&self, member: &Member) -> EngineResult<()> {
        let mut state = self.state.write().await;
        let key = format!("member:{}", member.id);
        if !state.kv.strings.contains_key(&key) {
            state.kv.strings.insert(key, serde_json::to_string(member)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::contract;

    fn repo() -> (tempfile::TempDir, SearchRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = SearchRepository::new(dir.path().join("search.snapshot"));
        (dir, repo)
    }

    #[tokio::test]
    async fn test_search_bucket_contract() {
        let (_dir, repo) = repo();
        contract::roundtrip_buckets(&repo).await;
    }

    #[tokio::test]
    async fn test_search_versions() {
        let (_dir, repo) = repo();
        contract::versions(&repo).await;
    }

    #[tokio::test]
    async fn test_search_members_and_metadata() {
        let (_dir, repo) = repo();
        contract::members_and_metadata(&repo).await;
    }

    #[tokio::test]
    async fn test_search_index_tracks_immutable() {
        let (_dir, repo) = repo();
        repo.upsert_bucket(&contract::bucket("1", None)).await.unwrap();

        let mut sealed = contract::bucket("1", None);
        sealed.immutable = true;
        repo.upsert_bucket(&sealed).await.unwrap();

        let state = repo.state.read().await;
        assert!(state.index.query(&[("immutable", "0")]).is_empty());
        assert_eq!(state.index.query(&[("immutable", "1")]).len(), 1);
    }

    #[tokio::test]
    async fn test_search_snapshot_roundtrip() {
        let (dir, repo) = repo();
        let mut bucket = contract::bucket("1", None);
        bucket.add_member("m1");
        repo.upsert_bucket(&bucket).await.unwrap();
        repo.upsert_bucket(&contract::bucket("1", Some(5000))).await.unwrap();
        repo.close().await.unwrap();

        let reopened = SearchRepository::new(dir.path().join("search.snapshot"));
        reopened.open().await.unwrap();
        let found = reopened
            .find_bucket("s", &BucketId::from_key("1"))
            .await
            .unwrap()
            .unwrap();
        assert!(found.members.contains("m1"));

        let version = reopened
            .find_bucket_version("s", &BucketId::from_key("1"), TimeBound::Latest)
            .await
            .unwrap();
        assert_eq!(version.and_then(|b| b.timestamp), Some(5000));
    }

    #[tokio::test]
    async fn test_search_snapshot_corruption_detected() {
        let (dir, repo) = repo();
        repo.upsert_bucket(&contract::bucket("1", None)).await.unwrap();
        repo.persist().await.unwrap();

        let path = dir.path().join("search.snapshot");
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let reopened = SearchRepository::new(&path);
        assert!(matches!(
            reopened.open().await,
            Err(EngineError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_search_stream_ids_with_separators_stay_apart() {
        let (_dir, repo) = repo();

        let mut colon = contract::bucket("c", None);
        colon.stream_id = "a:b".to_string();
        colon.add_member("m1".to_string());
        repo.upsert_bucket(&colon).await.unwrap();

        let mut plain = contract::bucket("b/c", None);
        plain.stream_id = "a".to_string();
        plain.add_member("m2".to_string());
        repo.upsert_bucket(&plain).await.unwrap();

        let found = repo
            .find_bucket("a:b", &BucketId::from_key("c"))
            .await
            .unwrap()
            .unwrap();
        assert!(found.members.contains("m1"));
        assert!(!found.members.contains("m2"));
        assert_eq!(repo.find_stream_buckets("a").await.unwrap().len(), 1);

        repo.put_metadata("stream", "a:b", &serde_json::json!(1)).await.unwrap();
        repo.put_metadata("stream:a", "b", &serde_json::json!(2)).await.unwrap();
        assert_eq!(
            repo.find_metadata("stream", "a:b").await.unwrap(),
            Some(serde_json::json!(1))
        );
    }
}
