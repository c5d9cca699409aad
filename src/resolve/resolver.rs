//! Fragment resolver
//!
//! Read path of the engine. Never writes: a resolution that finds nothing
//! leaves the repository exactly as it was.

use super::{dedupe, Fragment, ResolutionOutcome, ResolvedRelation};
use crate::builder::{Builder, Operation, Traversal};
use crate::extract::{FragmentId, Strategy};
use crate::index::IndexTree;
use crate::model::{
    Bucket, BucketId, EngineError, EngineResult, IndexValue, Relation, RelationType,
};
use crate::repository::{Repository, TimeBound};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

/// Request values extracted per level
struct Request {
    id: FragmentId,
    values: Vec<IndexValue>,
    timestamp: Option<i64>,
}

pub struct FragmentResolver {
    stream_id: String,
    strategy: Arc<Strategy>,
    builder: Arc<Builder>,
    repository: Arc<dyn Repository>,
    tree: Arc<RwLock<IndexTree>>,
}

impl FragmentResolver {
    pub fn new(
        stream_id: impl Into<String>,
        strategy: Arc<Strategy>,
        builder: Arc<Builder>,
        repository: Arc<dyn Repository>,
        tree: Arc<RwLock<IndexTree>>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            strategy,
            builder,
            repository,
            tree,
        }
    }

    /// Resolve a request identifier
    pub async fn resolve(&self, identifier: &str) -> EngineResult<ResolutionOutcome> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "resolve",
            %request_id,
            stream = %self.stream_id,
            identifier
        );

        async {
            let outcome = self.resolve_inner(identifier).await;
            match &outcome {
                Ok(ResolutionOutcome::Found(fragment)) => tracing::debug!(
                    members = fragment.members.len(),
                    relations = fragment.relations.len(),
                    "Resolved fragment"
                ),
                Ok(ResolutionOutcome::Redirect(target)) => {
                    tracing::debug!(%target, "Redirecting to canonical fragment")
                }
                Ok(ResolutionOutcome::NotFound) => tracing::debug!("Fragment not found"),
                Err(e) => tracing::warn!(error = %e, "Resolution failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn resolve_inner(&self, identifier: &str) -> EngineResult<ResolutionOutcome> {
        // ==================== Parsing ====================
        let Some(request) = self.parse(identifier)? else {
            return Ok(ResolutionOutcome::NotFound);
        };
        let bucket_id = BucketId::new(request.values.iter().map(|v| v.key.clone()).collect());

        // Neighbors come from the in-process tree; no I/O under the lock
        let walk = {
            let tree = self.tree.read().await;
            match self.builder.traverse(Operation::Get {
                tree: &tree,
                values: &request.values,
            }) {
                Traversal::Visited(walk) => walk,
                other => {
                    return Err(EngineError::Internal(format!(
                        "GET traversal produced {:?}",
                        other
                    )))
                }
            }
        };

        if !walk.reached {
            let err = EngineError::NoSuchBucket(bucket_id.to_key());
            tracing::error!(error = %err, "Bucket path not in index");
            return Ok(ResolutionOutcome::NotFound);
        }

        // ==================== PrefixWalk ====================
        let capable = self.strategy.timestamp_capable();
        let mut prefixes = bucket_id.prefixes();
        if !capable {
            prefixes.pop();
        }

        let lookups = prefixes
            .iter()
            .map(|prefix| self.repository.find_bucket(&self.stream_id, prefix));
        let prefix_buckets = join_all(lookups).await;

        let mut relations = Vec::new();
        for bucket in prefix_buckets {
            if let Some(bucket) = bucket? {
                relations.extend(self.rewrite_all(&request.id, &bucket.relations));
            }
        }
        for level in &walk.alternatives {
            relations.extend(self.rewrite_all(&request.id, &level.relations));
        }

        // ==================== LeafLookup ====================
        let leaf = if capable {
            match self.find_version(&request, &bucket_id).await? {
                VersionLookup::Found(leaf, timestamp_relations) => {
                    relations.extend(timestamp_relations);
                    leaf
                }
                VersionLookup::Redirect(target) => return Ok(ResolutionOutcome::Redirect(target)),
                VersionLookup::Missing => return Ok(ResolutionOutcome::NotFound),
            }
        } else {
            match self.repository.find_bucket(&self.stream_id, &bucket_id).await? {
                Some(bucket) if bucket.leaf => bucket,
                _ => {
                    let err = EngineError::NoSuchBucket(bucket_id.to_key());
                    tracing::error!(error = %err, "Leaf lookup failed");
                    return Ok(ResolutionOutcome::NotFound);
                }
            }
        };
        relations.extend(self.rewrite_all(&request.id, &leaf.relations));

        // ==================== Found ====================
        let member_ids: Vec<String> = leaf.members.iter().cloned().collect();
        let members = self.repository.find_members(&member_ids).await?;
        if members.len() < member_ids.len() {
            tracing::debug!(
                missing = member_ids.len() - members.len(),
                "Bucket references members not yet stored"
            );
        }

        Ok(ResolutionOutcome::Found(Fragment {
            identifier: request.id.reconstruct(),
            bucket_id,
            timestamp: leaf.timestamp,
            members,
            relations: dedupe(relations),
            cache: self.strategy.cache().directive(&leaf),
        }))
    }

    /// Parse and extract per-level values; `None` when the identifier is too long
    fn parse(&self, identifier: &str) -> EngineResult<Option<Request>> {
        let id = FragmentId::parse(identifier)?;

        let required = self.strategy.required_segments();
        let found = id.segments.len();
        if found < required {
            return Err(EngineError::NotEnoughPathSegments { required, found });
        }
        if found > required {
            tracing::debug!(required, found, "Identifier has extra path segments");
            return Ok(None);
        }

        let mut values = Vec::with_capacity(self.strategy.bucket_levels().len());
        for (depth, level) in self.strategy.bucket_levels().iter().enumerate() {
            let offset = self.strategy.segment_offset(depth);
            match level.path().extract_path(&id, offset)? {
                Some(value) => values.push(value),
                None => {
                    return Err(EngineError::InvalidIdentifier(format!(
                        "no value for level {} in '{}'",
                        depth, identifier
                    )))
                }
            }
        }

        let timestamp = match self.strategy.timestamp_level() {
            Some(level) => {
                let offset = self.strategy.segment_offset(values.len());
                level
                    .path()
                    .extract_path(&id, offset)?
                    .and_then(|v| v.value.as_millis())
            }
            None => None,
        };

        Ok(Some(Request {
            id,
            values,
            timestamp,
        }))
    }

    /// Request identifier pointing at `target`, keeping the rest of `id`
    fn rewrite(&self, id: &FragmentId, target: &BucketId) -> FragmentId {
        let mut rewritten = id.clone();
        let levels = self.strategy.bucket_levels();

        for (depth, key) in target.keys().iter().enumerate() {
            let Some(level) = levels.get(depth) else {
                break;
            };
            let offset = self.strategy.segment_offset(depth);
            let current = level
                .path()
                .extract_path(&rewritten, offset)
                .ok()
                .flatten();
            if current.map(|v| v.key) != Some(key.clone()) {
                rewritten =
                    level
                        .path()
                        .set_path(&IndexValue::from_key(key.clone()), &rewritten, offset);
            }
        }

        rewritten
    }

    fn rewrite_all(&self, id: &FragmentId, relations: &[Relation]) -> Vec<ResolvedRelation> {
        relations
            .iter()
            .map(|r| ResolvedRelation::from_relation(r, self.rewrite(id, &r.target).reconstruct()))
            .collect()
    }

    /// Timestamp-bounded leaf lookup
    async fn find_version(&self, request: &Request, id: &BucketId) -> EngineResult<VersionLookup> {
        let Some(level) = self.strategy.timestamp_level() else {
            return Err(EngineError::Internal(
                "version lookup on a stream without timestamp level".to_string(),
            ));
        };
        let offset = self.strategy.segment_offset(request.values.len());

        let bound = match request.timestamp {
            Some(t) => TimeBound::AtOrBefore(t),
            None => TimeBound::Latest,
        };
        let Some(leaf) = self
            .repository
            .find_bucket_version(&self.stream_id, id, bound)
            .await?
        else {
            let err = EngineError::NoSuchBucket(id.to_key());
            tracing::error!(error = %err, ?bound, "No bucket version at or before request");
            return Ok(VersionLookup::Missing);
        };

        let Some(found) = leaf.timestamp else {
            return Err(EngineError::Internal(format!(
                "version of {} has no timestamp",
                id
            )));
        };

        let window = |ms: i64| {
            let mut value = IndexValue::datetime(ms);
            value.path = leaf.value.as_ref().and_then(|v| v.path.clone());
            value
        };

        if request.timestamp != Some(found) {
            let canonical = level.path().set_path(&window(found), &request.id, offset);
            return Ok(VersionLookup::Redirect(canonical.reconstruct()));
        }

        let (older, newer) = futures_util::join!(
            self.repository
                .find_bucket_version(&self.stream_id, id, TimeBound::Before(found)),
            self.repository
                .find_bucket_version(&self.stream_id, id, TimeBound::After(found)),
        );

        let mut relations = Vec::new();
        let mut bounded = |kind: RelationType, ts: i64, value: IndexValue| {
            let target = level.path().set_path(&window(ts), &request.id, offset);
            let mut relation = Relation::new(kind, id.clone(), &value);
            relation.timestamp_bound = true;
            relations.push(ResolvedRelation::from_relation(&relation, target.reconstruct()));
        };

        if let Some(ts) = older?.and_then(|b| b.timestamp) {
            bounded(RelationType::LessThan, ts, window(found));
        }
        if let Some(ts) = newer?.and_then(|b| b.timestamp) {
            bounded(RelationType::GreaterThanOrEqual, ts, window(ts));
        }

        Ok(VersionLookup::Found(leaf, relations))
    }
}

enum VersionLookup {
    Found(Bucket, Vec<ResolvedRelation>),
    Redirect(String),
    Missing,
}
