//! Ordered Bucket Index
//!
//! In-process structures that place members into buckets and keep sibling
//! buckets navigable:
//!
//! - **SiblingOrder**: arena-backed doubly linked list of sorted siblings
//! - **IndexTree**: n-ary tree of bucket nodes, one sibling order per parent
//! - **RelationManager**: EqualTo, neighbor and sealing rules for a sibling set
//!
//! # Architecture
//!
//! ```text
//! Write: member → [x=1] → [y=2]           insert_child at each level
//!                   │
//!        siblings:  1 <-> 3 <-> 5          sorted, O(1) neighbors
//!
//! Read:  "1/2"   → GreaterThan → "3/2"     neighbors of the requested value
//! ```

mod ordering;
mod relations;
mod tree;

pub use ordering::{Iter, SiblingOrder, SlotId};
pub use relations::RelationManager;
pub use tree::{IndexTree, Inserted, NodeId, TreeNode};

/// Statistics about an index tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Bucket nodes (virtual root excluded)
    pub nodes: usize,
    /// Nodes without children
    pub leaves: usize,
    /// Deepest level reached
    pub max_depth: usize,
    /// Members routed through the root
    pub routed: usize,
}

impl IndexStats {
    pub fn of(tree: &IndexTree) -> Self {
        let mut stats = IndexStats {
            nodes: tree.len() - 1,
            routed: tree.node(tree.root()).routed,
            ..Default::default()
        };

        for id in 1..tree.len() {
            let node = tree.node(id);
            if node.is_leaf() {
                stats.leaves += 1;
            }
            stats.max_depth = stats.max_depth.max(node.depth);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexValue;

    #[test]
    fn test_index_stats() {
        let mut tree = IndexTree::new();
        assert_eq!(IndexStats::of(&tree), IndexStats::default());

        let root = tree.root();
        let a = tree.insert_child(root, IndexValue::integer(1)).node;
        let b = tree.insert_child(a, IndexValue::integer(2)).node;
        tree.insert_child(root, IndexValue::integer(3));
        tree.add_routed(b, 1);

        let stats = IndexStats::of(&tree);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.routed, 1);
    }
}
