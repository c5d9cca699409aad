//! In-memory backend
//!
//! Buckets hang off the same [`IndexTree`] the write path uses, so bucket
//! placement and sibling order match the other backends exactly. Timestamp
//! versions of a bucket live in a per-node [`SiblingOrder`] keyed by version.

use super::{Repository, TimeBound};
use crate::index::{IndexTree, NodeId, SiblingOrder};
use crate::model::{Bucket, BucketId, EngineResult, IndexValue, Member};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct StreamStore {
    tree: IndexTree,
    /// Unversioned buckets by node
    buckets: HashMap<NodeId, Bucket>,
    /// Timestamp versions by node, oldest first
    versions: HashMap<NodeId, SiblingOrder<Bucket>>,
}

impl StreamStore {
    fn node_for(&mut self, bucket: &Bucket) -> NodeId {
        let value = match bucket.timestamp {
            Some(_) => None,
            None => bucket.value.as_ref(),
        };
        self.tree.ensure_path(&bucket.id, value)
    }

    fn upsert(&mut self, bucket: &Bucket) {
        let node = self.node_for(bucket);

        let Some(timestamp) = bucket.timestamp else {
            self.buckets
                .entry(node)
                .and_modify(|stored| stored.merge(bucket))
                .or_insert_with(|| bucket.clone());
            return;
        };

        let versions = self.versions.entry(node).or_default();
        match versions.find_first(|v| v.value.as_millis() == Some(timestamp)) {
            Some(slot) => versions.item_mut(slot).merge(bucket),
            None => {
                versions.insert(IndexValue::datetime(timestamp), bucket.clone());
            }
        }
    }

    fn version(&self, id: &BucketId, bound: TimeBound) -> Option<&Bucket> {
        let node = self.tree.find(id)?;
        let versions = self.versions.get(&node)?;
        let admits = |v: &IndexValue| v.value.as_millis().is_some_and(|t| bound.admits(t));

        let slot = if bound.newest_first() {
            versions.find_last(admits)
        } else {
            versions.find_first(admits)
        }?;
        Some(versions.item(slot))
    }
}

/// Process-local repository; contents are lost on drop
#[derive(Default)]
pub struct MemoryRepository {
    streams: RwLock<HashMap<String, StreamStore>>,
    members: RwLock<HashMap<String, Member>>,
    metadata: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored buckets of a stream, versions included
    pub async fn bucket_count(&self, stream_id: &str) -> usize {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .map(|s| s.buckets.len() + s.versions.values().map(SiblingOrder::len).sum::<usize>())
            .unwrap_or(0)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn find_metadata(&self, kind: &str, id: &str) -> EngineResult<Option<serde_json::Value>> {
        let metadata = self.metadata.read().await;
        Ok(metadata.get(&(kind.to_string(), id.to_string())).cloned())
    }

    async fn put_metadata(
        &self,
        kind: &str,
        id: &str,
        value: &serde_json::Value,
    ) -> EngineResult<()> {
        let mut metadata = self.metadata.write().await;
        metadata.insert((kind.to_string(), id.to_string()), value.clone());
        Ok(())
    }

    async fn find_roots(&self, stream_id: &str) -> EngineResult<Vec<BucketId>> {
        let streams = self.streams.read().await;
        let Some(store) = streams.get(stream_id) else {
            return Ok(Vec::new());
        };

        let mut roots: Vec<BucketId> = store
            .buckets
            .values()
            .chain(store.versions.values().flat_map(|o| o.iter().map(|(_, _, b)| b)))
            .filter(|b| b.root)
            .map(|b| b.id.clone())
            .collect();
        roots.sort();
        roots.dedup();
        Ok(roots)
    }

    async fn find_bucket(&self, stream_id: &str, id: &BucketId) -> EngineResult<Option<Bucket>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .and_then(|store| store.tree.find(id).and_then(|node| store.buckets.get(&node)))
            .cloned())
    }

    async fn find_bucket_version(
        &self,
        stream_id: &str,
        id: &BucketId,
        bound: TimeBound,
    ) -> EngineResult<Option<Bucket>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .and_then(|store| store.version(id, bound))
            .cloned())
    }

    async fn find_stream_buckets(&self, stream_id: &str) -> EngineResult<Vec<Bucket>> {
        let streams = self.streams.read().await;
        let Some(store) = streams.get(stream_id) else {
            return Ok(Vec::new());
        };

        Ok(store
            .buckets
            .values()
            .cloned()
            .chain(
                store
                    .versions
                    .values()
                    .flat_map(|o| o.iter().map(|(_, _, b)| b.clone())),
            )
            .collect())
    }

    async fn find_members(&self, ids: &[String]) -> EngineResult<Vec<Member>> {
        let members = self.members.read().await;
        Ok(ids.iter().filter_map(|id| members.get(id).cloned()).collect())
    }

    async fn upsert_bucket(&self, bucket: &Bucket) -> EngineResult<()> {
        let mut streams = self.streams.write().await;
        streams
            .entry(bucket.stream_id.clone())
            .or_default()
            .upsert(bucket);
        Ok(())
    }

    async fn insert_member(&self, member: &Member) -> EngineResult<()> {
        let mut members = self.members.write().await;
        members
            .entry(member.id.clone())
            .or_insert_with(|| member.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::contract;

    #[tokio::test]
    async fn test_memory_bucket_contract() {
        let repo = MemoryRepository::new();
        contract::roundtrip_buckets(&repo).await;
        assert_eq!(repo.bucket_count("s").await, 3);
    }

    #[tokio::test]
    async fn test_memory_versions() {
        let repo = MemoryRepository::new();
        contract::versions(&repo).await;
        assert_eq!(repo.bucket_count("s").await, 3);
    }

    #[tokio::test]
    async fn test_memory_members_and_metadata() {
        let repo = MemoryRepository::new();
        contract::members_and_metadata(&repo).await;
        assert_eq!(repo.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_memory_reuses_tree_order() {
        let repo = MemoryRepository::new();
        for key in ["5", "1", "3"] {
            repo.upsert_bucket(&contract::bucket(key, None)).await.unwrap();
        }

        let streams = repo.streams.read().await;
        let store = streams.get("s").unwrap();
        let root = store.tree.root();
        let keys: Vec<String> = store
            .tree
            .sorted_children(root)
            .into_iter()
            .map(|n| store.tree.path_of(n).to_key())
            .collect();
        assert_eq!(keys, vec!["1", "3", "5"]);
    }
}
