//! Builder Traversal
//!
//! Walks the index tree one strategy level at a time. Both modes go through
//! [`Builder::traverse`]:
//!
//! - **ADD**: place a member. Creates missing children in sorted position,
//!   records EqualTo relations and sealing, and appends the member id at the
//!   leaves. Produces the bucket changes to persist. Under a monotonic level
//!   only the last sibling is open; a member sorting before it is reported
//!   late and the tree is left untouched.
//! - **GET**: follow request values down the tree and collect, per level, the
//!   neighbor relations of the requested value.
//!
//! # Bucket mapping
//!
//! ```text
//! levels:  [property x] [property y] [timestamp t]
//! tree:    root ─ 1 ─ 2 ─ 1704067200000
//! buckets: "1"   "1/2"   "1/2" @ 2024-01-01T00:00:00Z
//! ```
//!
//! Timestamp nodes are versions of their parent's bucket id, not new ids.

use crate::extract::{Extraction, Strategy};
use crate::index::{IndexTree, NodeId, RelationManager};
use crate::model::{
    Bucket, BucketId, ExtractionMiss, IndexValue, LateArrival, Member, Relation, RelationType,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// What to do on one traversal
pub enum Operation<'a> {
    /// Place a member, mutating the tree
    Add {
        tree: &'a mut IndexTree,
        member: &'a Member,
    },
    /// Follow request values (one per bucket level) without mutation
    Get {
        tree: &'a IndexTree,
        values: &'a [IndexValue],
    },
}

/// Outcome of one traversal
#[derive(Debug, Clone)]
pub enum Traversal {
    /// Member placed; changes are ancestors first
    Added(Vec<BucketChange>),
    /// Member lacks a level's value; tree left untouched
    Skipped(ExtractionMiss),
    /// Member would land behind the open bucket of a monotonic level; tree left untouched
    Late(LateArrival),
    /// Read walk result
    Visited(GetTraversal),
}

/// Partial bucket to merge into the repository
#[derive(Debug, Clone)]
pub struct BucketChange {
    pub bucket: Bucket,
    /// First time this bucket appears
    pub created: bool,
}

/// Neighbor relations found at one level of a GET walk
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRelations {
    /// Level index (0 = root buckets)
    pub depth: usize,
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetTraversal {
    /// Deepest bucket reached
    pub path: BucketId,
    /// Whether every requested level exists in the tree
    pub reached: bool,
    pub alternatives: Vec<LevelRelations>,
}

pub struct Builder {
    stream_id: String,
    strategy: Arc<Strategy>,
}

impl Builder {
    pub fn new(stream_id: impl Into<String>, strategy: Arc<Strategy>) -> Self {
        Self {
            stream_id: stream_id.into(),
            strategy,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Single dispatch point for both traversal modes
    pub fn traverse(&self, op: Operation<'_>) -> Traversal {
        match op {
            Operation::Add { tree, member } => self.add(tree, member),
            Operation::Get { tree, values } => Traversal::Visited(self.get(tree, values)),
        }
    }

    // ==================== ADD ====================

    fn add(&self, tree: &mut IndexTree, member: &Member) -> Traversal {
        let levels = self.strategy.levels();

        // Extract everything first so a miss leaves the tree untouched
        let mut extracted = Vec::with_capacity(levels.len());
        for level in levels {
            match level.quad().extract(member) {
                Extraction::Values(values) => extracted.push(values),
                Extraction::Skip(miss) => return Traversal::Skipped(miss),
            }
        }

        if let Some(late) = self.late_arrival(tree, member, &extracted) {
            return Traversal::Late(late);
        }

        let mut changes = Changes::default();
        let mut cursors: Vec<NodeId> = vec![tree.root()];

        for (depth, (level, values)) in levels.iter().zip(extracted).enumerate() {
            let mut next = Vec::new();

            for parent in cursors {
                let assigned = match level.index() {
                    Some(index) => index.assign(tree.node(parent), values.clone()),
                    None => values.clone(),
                };
                tree.node_mut(parent).routed += 1;
                let parent_path = tree.path_of(parent);

                for value in assigned {
                    let inserted = tree.insert_child(parent, value);
                    let bucket = self.bucket_for(tree, inserted.node);
                    changes.push(bucket, inserted.created);

                    if inserted.created {
                        tracing::debug!(
                            stream = %self.stream_id,
                            depth,
                            bucket = %tree.path_of(inserted.node),
                            "Created bucket node"
                        );

                        if !level.is_timestamp() {
                            self.relate_equal(tree, parent, inserted.slot, &parent_path, &mut changes);
                        }

                        if level.monotonic() {
                            let order = &tree.node(parent).order;
                            if let Some(prev) = RelationManager::sealed_predecessor(order, inserted.slot) {
                                let sealed = *order.item(prev);
                                let mut bucket = self.bucket_for(tree, sealed);
                                bucket.immutable = true;
                                changes.push(bucket, false);
                            }
                        }
                    }

                    if !next.contains(&inserted.node) {
                        next.push(inserted.node);
                    }
                }
            }

            cursors = next;
        }

        for leaf in cursors {
            tree.node_mut(leaf).routed += 1;
            let mut bucket = self.bucket_for(tree, leaf);
            bucket.add_member(member.id.clone());
            changes.push(bucket, false);
        }

        Traversal::Added(changes.into_inner())
    }

    /// Walk the would-be placement read-only and find a monotonic level where
    /// the member sorts before the open (last) sibling
    fn late_arrival(
        &self,
        tree: &IndexTree,
        member: &Member,
        extracted: &[Vec<IndexValue>],
    ) -> Option<LateArrival> {
        let mut cursors: Vec<NodeId> = vec![tree.root()];

        for (level, values) in self.strategy.levels().iter().zip(extracted) {
            let mut next = Vec::new();

            for parent in cursors {
                let assigned = match level.index() {
                    Some(index) => index.assign(tree.node(parent), values.clone()),
                    None => values.clone(),
                };

                for value in assigned {
                    let order = &tree.node(parent).order;
                    if level.monotonic() {
                        if let Some(tail) = order.tail() {
                            if value.compare(order.value(tail)) == Ordering::Less {
                                return Some(LateArrival::new(
                                    member.id.clone(),
                                    tree.path_of(parent),
                                    value.key,
                                ));
                            }
                        }
                    }

                    // Below a node that does not exist yet nothing can be sealed
                    if let Some(child) = tree.child(parent, &value.key) {
                        if !next.contains(&child) {
                            next.push(child);
                        }
                    }
                }
            }

            cursors = next;
        }

        None
    }

    /// EqualTo relations in both directions between a new sibling and its equals
    fn relate_equal(
        &self,
        tree: &IndexTree,
        parent: NodeId,
        slot: usize,
        parent_path: &BucketId,
        changes: &mut Changes,
    ) {
        let order = &tree.node(parent).order;
        let created = *order.item(slot);

        for (other_slot, relation) in RelationManager::equal_relations(order, slot, parent_path) {
            let other = *order.item(other_slot);

            let mut forward = self.bucket_for(tree, created);
            forward.add_relation(relation);
            changes.push(forward, false);

            let mut backward = self.bucket_for(tree, other);
            backward.add_relation(Relation::new(
                RelationType::EqualTo,
                tree.path_of(created),
                order.value(other_slot),
            ));
            changes.push(backward, false);
        }
    }

    /// Empty bucket shell describing `node`
    fn bucket_for(&self, tree: &IndexTree, node: NodeId) -> Bucket {
        let levels = self.strategy.levels();
        let entry = tree.node(node);
        let level = &levels[entry.depth - 1];

        let mut bucket = if level.is_timestamp() {
            let parent = entry.parent.unwrap_or_default();
            let mut bucket = Bucket::new(self.stream_id.clone(), tree.path_of(parent));
            bucket.timestamp = entry.value.as_ref().and_then(|v| v.value.as_millis());
            bucket.root = bucket.id.depth() == 0;
            bucket
        } else {
            let mut bucket = Bucket::new(self.stream_id.clone(), tree.path_of(node));
            bucket.root = entry.depth == 1;
            bucket
        };

        bucket.value = entry.value.clone();
        bucket.leaf = entry.depth == levels.len();
        bucket
    }

    // ==================== GET ====================

    fn get(&self, tree: &IndexTree, values: &[IndexValue]) -> GetTraversal {
        let mut node = tree.root();
        let mut alternatives = Vec::with_capacity(values.len());
        let mut reached = true;

        for (depth, requested) in values.iter().enumerate() {
            let parent_path = tree.path_of(node);
            let child = tree.child(node, &requested.key);

            // Stored values carry the real datatype; the request only has a key
            let value = child
                .and_then(|c| tree.node(c).value.clone())
                .unwrap_or_else(|| requested.clone());

            let relations =
                RelationManager::neighbor_relations(&tree.node(node).order, &value, &parent_path);
            alternatives.push(LevelRelations { depth, relations });

            match child {
                Some(c) => node = c,
                None => {
                    reached = false;
                    break;
                }
            }
        }

        GetTraversal {
            path: tree.path_of(node),
            reached,
            alternatives,
        }
    }
}

/// Bucket changes keyed by (id, version), merged in first-seen order
#[derive(Default)]
struct Changes {
    entries: Vec<BucketChange>,
}

impl Changes {
    fn push(&mut self, bucket: Bucket, created: bool) {
        let existing = self
            .entries
            .iter_mut()
            .find(|c| c.bucket.id == bucket.id && c.bucket.version() == bucket.version());

        match existing {
            Some(change) => {
                change.bucket.merge(&bucket);
                change.created |= created;
            }
            None => self.entries.push(BucketChange { bucket, created }),
        }
    }

    fn into_inner(mut self) -> Vec<BucketChange> {
        self.entries
            .sort_by_key(|c| (c.bucket.id.depth(), c.bucket.timestamp.is_some()));
        self.entries
    }
}
