//! Index Tree
//!
//! In-process n-ary tree mirroring the bucket hierarchy. Node 0 is the
//! virtual root above the root buckets; a node at depth `d` stands for the
//! bucket whose id is the keys on the path from the root.
//!
//! Children are reachable two ways: by key (O(1) lookup) and through the
//! parent's [`SiblingOrder`] (sorted neighbors).

use super::ordering::{SiblingOrder, SlotId};
use crate::model::{BucketId, IndexValue};
use std::collections::HashMap;

/// Arena index of a tree node
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Value at this level (`None` for the virtual root)
    pub value: Option<IndexValue>,
    pub parent: Option<NodeId>,
    pub depth: usize,
    /// Position in the parent's sibling order
    pub slot: Option<SlotId>,
    /// Members routed through this node so far
    pub routed: usize,
    pub children: HashMap<String, NodeId>,
    pub order: SiblingOrder<NodeId>,
}

impl TreeNode {
    fn new(value: Option<IndexValue>, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            value,
            parent,
            depth,
            slot: None,
            routed: 0,
            children: HashMap::new(),
            order: SiblingOrder::new(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.value.as_ref().map(|v| v.key.as_str())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Result of [`IndexTree::insert_child`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub node: NodeId,
    pub slot: SlotId,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct IndexTree {
    nodes: Vec<TreeNode>,
}

impl Default for IndexTree {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TreeNode::new(None, None, 0)],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id]
    }

    /// Number of nodes, virtual root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn child(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        self.nodes[parent].children.get(key).copied()
    }

    /// Get or create the child of `parent` keyed by `value.key`
    pub fn insert_child(&mut self, parent: NodeId, value: IndexValue) -> Inserted {
        if let Some(node) = self.child(parent, &value.key) {
            let slot = self.nodes[node].slot.unwrap_or_default();
            return Inserted {
                node,
                slot,
                created: false,
            };
        }

        let node = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        let key = value.key.clone();

        self.nodes
            .push(TreeNode::new(Some(value.clone()), Some(parent), depth));
        let slot = self.nodes[parent].order.insert(value, node);
        self.nodes[node].slot = Some(slot);
        self.nodes[parent].children.insert(key, node);

        Inserted {
            node,
            slot,
            created: true,
        }
    }

    /// Node for `id`, if every key on the path exists
    pub fn find(&self, id: &BucketId) -> Option<NodeId> {
        let mut node = self.root();
        for key in id.keys() {
            node = self.child(node, key)?;
        }
        Some(node)
    }

    /// Create every missing node on the path; `value` describes the last key
    pub fn ensure_path(&mut self, id: &BucketId, value: Option<&IndexValue>) -> NodeId {
        let mut node = self.root();
        let depth = id.depth();

        for (i, key) in id.keys().iter().enumerate() {
            let index_value = match value {
                Some(v) if i + 1 == depth && v.key == *key => v.clone(),
                _ => IndexValue::from_key(key.clone()),
            };
            node = self.insert_child(node, index_value).node;
        }

        node
    }

    /// Keys from the root down to `node`
    pub fn path_of(&self, node: NodeId) -> BucketId {
        let mut keys = Vec::with_capacity(self.nodes[node].depth);
        let mut cursor = Some(node);

        while let Some(id) = cursor {
            let entry = &self.nodes[id];
            if let Some(key) = entry.key() {
                keys.push(key.to_string());
            }
            cursor = entry.parent;
        }

        keys.reverse();
        BucketId::new(keys)
    }

    /// Add `count` routed members to `node` and all of its ancestors
    pub fn add_routed(&mut self, node: NodeId, count: usize) {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            self.nodes[id].routed += count;
            cursor = self.nodes[id].parent;
        }
    }

    /// Children of `node` in sorted order
    pub fn sorted_children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes[node]
            .order
            .iter()
            .map(|(_, _, child)| *child)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_child_is_idempotent() {
        let mut tree = IndexTree::new();
        let root = tree.root();

        let first = tree.insert_child(root, IndexValue::integer(3));
        assert!(first.created);
        let again = tree.insert_child(root, IndexValue::integer(3));
        assert!(!again.created);
        assert_eq!(first.node, again.node);
        assert_eq!(first.slot, again.slot);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_path_of_and_find() {
        let mut tree = IndexTree::new();
        let root = tree.root();
        let a = tree.insert_child(root, IndexValue::from_key("a")).node;
        let b = tree.insert_child(a, IndexValue::from_key("b")).node;

        let id = tree.path_of(b);
        assert_eq!(id.to_key(), "a/b");
        assert_eq!(tree.find(&id), Some(b));
        assert_eq!(tree.node(b).depth, 2);
        assert!(tree.find(&BucketId::from_key("a/c")).is_none());
        assert_eq!(tree.find(&BucketId::root()), Some(root));
    }

    #[test]
    fn test_ensure_path_uses_value_for_last_key() {
        let mut tree = IndexTree::new();
        let value = IndexValue::datetime(1000);
        let id = BucketId::new(vec!["x".into(), "1000".into()]);

        let node = tree.ensure_path(&id, Some(&value));
        assert_eq!(tree.node(node).value.as_ref(), Some(&value));
        assert_eq!(tree.ensure_path(&id, None), node);
    }

    #[test]
    fn test_sorted_children_and_routed() {
        let mut tree = IndexTree::new();
        let root = tree.root();
        for v in [5, 1, 3] {
            tree.insert_child(root, IndexValue::integer(v));
        }

        let keys: Vec<String> = tree
            .sorted_children(root)
            .into_iter()
            .map(|n| tree.path_of(n).to_key())
            .collect();
        assert_eq!(keys, vec!["1", "3", "5"]);

        let leaf = tree.find(&BucketId::from_key("3")).unwrap();
        tree.add_routed(leaf, 2);
        assert_eq!(tree.node(leaf).routed, 2);
        assert_eq!(tree.node(root).routed, 2);
    }
}
