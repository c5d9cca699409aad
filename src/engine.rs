//! Fragmentation Engine
//!
//! Hosting-adapter surface over one member stream:
//! - Write path: Member → extract → ADD traversal → upsert buckets → member store
//! - Read path: identifier → GET traversal → repository lookups → Fragment
//!
//! The index tree is shared behind Tokio's async RwLock; writers are
//! additionally serialised by a write gate so tree and repository advance
//! together. A write that fails in the repository keeps its placement under
//! the gate, so retrying the same member re-applies those bucket changes
//! instead of placing it a second time.

use crate::builder::{BucketChange, Builder, Operation, Traversal};
use crate::config::Config;
use crate::extract::{LevelDescriptor, Strategy};
use crate::index::{IndexStats, IndexTree, NodeId};
use crate::model::{
    Bucket, BucketId, EngineError, EngineResult, ExtractionMiss, IndexValue, LateArrival,
    Member,
};
use crate::repository::{open_repository, Repository};
use crate::resolve::{FragmentResolver, ResolutionOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Metadata kind under which stream descriptions are stored
const STREAM_METADATA: &str = "stream";

/// Result of writing one member
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Member placed and persisted
    Stored {
        /// Buckets upserted
        buckets: usize,
        /// Of which newly created
        created: usize,
    },
    /// A member with this id was already written
    Duplicate,
    /// Member lacks a level's value and was not placed
    Skipped(ExtractionMiss),
    /// Member sorts before the open bucket of a monotonic level and was not placed
    Late(LateArrival),
}

/// Placements already applied to the tree whose persistence failed, by member id
type PendingWrites = HashMap<String, Vec<BucketChange>>;

/// Engine statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub stream_id: String,
    pub backend: &'static str,
    pub index: IndexStats,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stream: {}, Backend: {}, Buckets: {}, Leaves: {}, Depth: {}, Members: {}",
            self.stream_id,
            self.backend,
            self.index.nodes,
            self.index.leaves,
            self.index.max_depth,
            self.index.routed
        )
    }
}

/// Main engine
pub struct Engine {
    stream_id: String,
    strategy: Arc<Strategy>,
    repository: Arc<dyn Repository>,
    tree: Arc<RwLock<IndexTree>>,
    builder: Arc<Builder>,
    resolver: FragmentResolver,
    write_gate: Mutex<PendingWrites>,
}

impl Engine {
    /// Open an engine from configuration
    pub async fn open(config: &Config) -> EngineResult<Self> {
        let strategy = Strategy::from_config(&config.strategy, &config.cache)?;
        let repository = open_repository(&config.repository)?;
        Self::with_repository(config.stream.id.clone(), strategy, repository).await
    }

    /// Open an engine over an existing repository
    pub async fn with_repository(
        stream_id: impl Into<String>,
        strategy: Strategy,
        repository: Arc<dyn Repository>,
    ) -> EngineResult<Self> {
        let stream_id = stream_id.into();
        let strategy = Arc::new(strategy);

        repository.open().await?;
        check_stream_metadata(repository.as_ref(), &stream_id, &strategy.descriptors()).await?;

        let buckets = repository.find_stream_buckets(&stream_id).await?;
        let bucket_count = buckets.len();
        let tree = Arc::new(RwLock::new(hydrate(buckets)));

        let builder = Arc::new(Builder::new(stream_id.clone(), Arc::clone(&strategy)));
        let resolver = FragmentResolver::new(
            stream_id.clone(),
            Arc::clone(&strategy),
            Arc::clone(&builder),
            Arc::clone(&repository),
            Arc::clone(&tree),
        );

        tracing::info!(
            stream = %stream_id,
            backend = repository.backend(),
            levels = strategy.levels().len(),
            "Opened stream with {} stored buckets",
            bucket_count
        );

        Ok(Self {
            stream_id,
            strategy,
            repository,
            tree,
            builder,
            resolver,
            write_gate: Mutex::new(PendingWrites::new()),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    // ==================== Write Path ====================

    /// Place one member into its buckets
    pub async fn write(&self, member: &Member) -> EngineResult<WriteOutcome> {
        let mut pending = self.write_gate.lock().await;

        let existing = self
            .repository
            .find_members(std::slice::from_ref(&member.id))
            .await?;
        if !existing.is_empty() {
            tracing::debug!(member = %member.id, "Member already written");
            return Ok(WriteOutcome::Duplicate);
        }

        let changes = match pending.remove(&member.id) {
            Some(changes) => {
                tracing::info!(member = %member.id, "Retrying earlier placement");
                changes
            }
            None => match self.place(member).await {
                Traversal::Added(changes) => changes,
                Traversal::Skipped(miss) => {
                    tracing::warn!(error = %miss, "Member skipped");
                    return Ok(WriteOutcome::Skipped(miss));
                }
                Traversal::Late(late) => {
                    tracing::warn!(error = %late, "Late member not placed");
                    return Ok(WriteOutcome::Late(late));
                }
                Traversal::Visited(_) => {
                    return Err(EngineError::Internal(
                        "ADD traversal produced a read walk".to_string(),
                    ))
                }
            },
        };

        let created = match self.store(member, &changes).await {
            Ok(created) => created,
            Err(e) => {
                pending.insert(member.id.clone(), changes);
                return Err(e);
            }
        };

        tracing::debug!(
            member = %member.id,
            buckets = changes.len(),
            created,
            "Stored member"
        );

        Ok(WriteOutcome::Stored {
            buckets: changes.len(),
            created,
        })
    }

    /// Write members in order
    pub async fn write_batch(&self, members: &[Member]) -> EngineResult<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(members.len());
        for member in members {
            outcomes.push(self.write(member).await?);
        }
        Ok(outcomes)
    }

    /// ADD traversal under the tree write lock
    async fn place(&self, member: &Member) -> Traversal {
        let mut tree = self.tree.write().await;
        self.builder.traverse(Operation::Add {
            tree: &mut tree,
            member,
        })
    }

    /// Persist a placement, then the member itself
    async fn store(&self, member: &Member, changes: &[BucketChange]) -> EngineResult<usize> {
        let created = self.persist(changes).await?;
        if let Err(e) = self.repository.insert_member(member).await {
            tracing::error!(member = %member.id, error = %e, "Member insert failed");
            return Err(e);
        }
        Ok(created)
    }

    /// Upsert changes ancestors first; returns how many buckets are new
    async fn persist(&self, changes: &[BucketChange]) -> EngineResult<usize> {
        let mut created = 0;
        for change in changes {
            if let Err(e) = self.repository.upsert_bucket(&change.bucket).await {
                tracing::error!(
                    bucket = %change.bucket.id,
                    error = %e,
                    "Bucket upsert failed; placement kept for retry"
                );
                return Err(e);
            }
            if change.created {
                created += 1;
            }
        }
        Ok(created)
    }

    // ==================== Read Path ====================

    /// Resolve a fragment identifier
    pub async fn resolve(&self, identifier: &str) -> EngineResult<ResolutionOutcome> {
        self.resolver.resolve(identifier).await
    }

    /// Root bucket ids, sorted
    pub async fn roots(&self) -> EngineResult<Vec<BucketId>> {
        self.repository.find_roots(&self.stream_id).await
    }

    pub async fn stats(&self) -> EngineStats {
        let tree = self.tree.read().await;
        EngineStats {
            stream_id: self.stream_id.clone(),
            backend: self.repository.backend(),
            index: IndexStats::of(&tree),
        }
    }

    /// Flush and release the repository
    pub async fn close(&self) -> EngineResult<()> {
        let _gate = self.write_gate.lock().await;
        self.repository.close().await?;
        tracing::info!(stream = %self.stream_id, "Closed stream");
        Ok(())
    }
}

/// Store the level pipeline, or warn when it differs from the stored one
async fn check_stream_metadata(
    repository: &dyn Repository,
    stream_id: &str,
    descriptors: &[LevelDescriptor],
) -> EngineResult<()> {
    let current = serde_json::json!({ "levels": descriptors });

    match repository.find_metadata(STREAM_METADATA, stream_id).await? {
        Some(stored) if stored == current => {}
        Some(stored) => {
            tracing::warn!(
                stream = %stream_id,
                stored = %stored,
                configured = %current,
                "Stream was written with a different strategy"
            );
        }
        None => {
            repository
                .put_metadata(STREAM_METADATA, stream_id, &current)
                .await?;
        }
    }

    Ok(())
}

/// Rebuild the in-process tree from stored buckets
///
/// A node's routed count is the number of distinct members stored beneath
/// it, which is what ADD traversals count.
fn hydrate(mut buckets: Vec<Bucket>) -> IndexTree {
    buckets.sort_by_key(|b| (b.id.depth(), b.timestamp.is_some(), b.timestamp));

    let mut tree = IndexTree::new();
    let mut members: HashMap<NodeId, HashSet<String>> = HashMap::new();

    for bucket in &buckets {
        let node = match bucket.timestamp {
            None => tree.ensure_path(&bucket.id, bucket.value.as_ref()),
            Some(ts) => {
                let parent = tree.ensure_path(&bucket.id, None);
                let value = bucket
                    .value
                    .clone()
                    .unwrap_or_else(|| IndexValue::datetime(ts));
                tree.insert_child(parent, value).node
            }
        };

        if bucket.leaf && !bucket.members.is_empty() {
            let mut cursor = Some(node);
            while let Some(id) = cursor {
                members
                    .entry(id)
                    .or_default()
                    .extend(bucket.members.iter().cloned());
                cursor = tree.node(id).parent;
            }
        }
    }

    for (node, ids) in members {
        tree.node_mut(node).routed = ids.len();
    }

    tree
}
