//! Relation Manager
//!
//! Computes relations for one sibling set:
//!
//! - **EqualTo**: siblings with a different key but an equal value.
//!   Persisted on both buckets when the second one is created.
//! - **LessThan / GreaterThan**: immediate neighbors in sorted order, skipping
//!   equal siblings. Computed at resolution time, never persisted.
//! - **Sealing**: under a monotonic level, a new tail sibling seals the
//!   previous maximum.

use super::ordering::{SiblingOrder, SlotId};
use crate::model::{BucketId, IndexValue, Relation, RelationType};
use std::cmp::Ordering;

pub struct RelationManager;

impl RelationManager {
    /// Other siblings comparing equal to the one at `slot`
    pub fn equal_siblings<T>(order: &SiblingOrder<T>, slot: SlotId) -> Vec<SlotId> {
        let value = order.value(slot);
        let mut equal = Vec::new();

        let mut cursor = order.prev(slot);
        while let Some(s) = cursor {
            if order.value(s).compare(value) != Ordering::Equal {
                break;
            }
            equal.push(s);
            cursor = order.prev(s);
        }

        let mut cursor = order.next(slot);
        while let Some(s) = cursor {
            if order.value(s).compare(value) != Ordering::Equal {
                break;
            }
            equal.push(s);
            cursor = order.next(s);
        }

        equal
    }

    /// Sibling sealed by inserting `slot`: the old tail, if `slot` is the new tail
    pub fn sealed_predecessor<T>(order: &SiblingOrder<T>, slot: SlotId) -> Option<SlotId> {
        if order.tail() != Some(slot) {
            return None;
        }
        order.prev(slot)
    }

    /// Closest strictly smaller and strictly greater siblings of `value`
    ///
    /// `value` need not be in the order; siblings equal to it are skipped.
    pub fn neighbors<T>(
        order: &SiblingOrder<T>,
        value: &IndexValue,
    ) -> (Option<SlotId>, Option<SlotId>) {
        let lower = order.find_last(|v| v.compare(value) == Ordering::Less);
        let upper = match lower {
            Some(slot) => {
                let mut cursor = order.next(slot);
                while let Some(s) = cursor {
                    if order.value(s).compare(value) == Ordering::Greater {
                        break;
                    }
                    cursor = order.next(s);
                }
                cursor
            }
            None => order.find_first(|v| v.compare(value) == Ordering::Greater),
        };
        (lower, upper)
    }

    /// Neighbor relations from the bucket for `value` under `parent`
    pub fn neighbor_relations<T>(
        order: &SiblingOrder<T>,
        value: &IndexValue,
        parent: &BucketId,
    ) -> Vec<Relation> {
        let (lower, upper) = Self::neighbors(order, value);
        let mut relations = Vec::with_capacity(2);

        if let Some(slot) = lower {
            relations.push(Relation::new(
                RelationType::LessThan,
                parent.child(order.value(slot).key.clone()),
                value,
            ));
        }
        if let Some(slot) = upper {
            relations.push(Relation::new(
                RelationType::GreaterThan,
                parent.child(order.value(slot).key.clone()),
                value,
            ));
        }

        relations
    }

    /// EqualTo relations from the bucket at `slot` to its equal siblings
    pub fn equal_relations<T>(
        order: &SiblingOrder<T>,
        slot: SlotId,
        parent: &BucketId,
    ) -> Vec<(SlotId, Relation)> {
        Self::equal_siblings(order, slot)
            .into_iter()
            .map(|other| {
                let relation = Relation::new(
                    RelationType::EqualTo,
                    parent.child(order.value(other).key.clone()),
                    order.value(slot),
                );
                (other, relation)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_of(keys: &[&str]) -> (SiblingOrder<()>, Vec<SlotId>) {
        let mut order = SiblingOrder::new();
        let slots = keys
            .iter()
            .map(|k| order.insert(IndexValue::from_key(*k), ()))
            .collect();
        (order, slots)
    }

    #[test]
    fn test_neighbors_match_sorted_order() {
        let (order, _) = order_of(&["5", "1", "9", "3"]);

        let (lower, upper) = RelationManager::neighbors(&order, &IndexValue::from_key("3"));
        assert_eq!(order.value(lower.unwrap()).key, "1");
        assert_eq!(order.value(upper.unwrap()).key, "5");

        let (lower, upper) = RelationManager::neighbors(&order, &IndexValue::from_key("1"));
        assert!(lower.is_none());
        assert_eq!(order.value(upper.unwrap()).key, "3");

        let (lower, upper) = RelationManager::neighbors(&order, &IndexValue::from_key("9"));
        assert_eq!(order.value(lower.unwrap()).key, "5");
        assert!(upper.is_none());
    }

    #[test]
    fn test_neighbors_of_absent_value() {
        let (order, _) = order_of(&["1", "5"]);
        let (lower, upper) = RelationManager::neighbors(&order, &IndexValue::from_key("3"));
        assert_eq!(order.value(lower.unwrap()).key, "1");
        assert_eq!(order.value(upper.unwrap()).key, "5");
    }

    #[test]
    fn test_neighbors_skip_equal_siblings() {
        let (order, _) = order_of(&["1", "2", "02", "3"]);
        let (lower, upper) = RelationManager::neighbors(&order, &IndexValue::from_key("2"));
        assert_eq!(order.value(lower.unwrap()).key, "1");
        assert_eq!(order.value(upper.unwrap()).key, "3");
    }

    #[test]
    fn test_equal_siblings() {
        let (order, slots) = order_of(&["1", "01", "2", "001"]);
        let mut equal: Vec<String> = RelationManager::equal_siblings(&order, slots[1])
            .into_iter()
            .map(|s| order.value(s).key.clone())
            .collect();
        equal.sort();
        assert_eq!(equal, vec!["001", "1"]);
        assert!(RelationManager::equal_siblings(&order, slots[2]).is_empty());
    }

    #[test]
    fn test_sealed_predecessor_only_for_new_tail() {
        let mut order = SiblingOrder::new();
        let zero = order.insert(IndexValue::integer(0), ());
        assert!(RelationManager::sealed_predecessor(&order, zero).is_none());

        let one = order.insert(IndexValue::integer(1), ());
        assert_eq!(RelationManager::sealed_predecessor(&order, one), Some(zero));

        let half = order.insert(IndexValue::from_key("0.5"), ());
        assert!(RelationManager::sealed_predecessor(&order, half).is_none());
    }

    #[test]
    fn test_neighbor_relations_targets() {
        let (order, _) = order_of(&["2", "4"]);
        let parent = BucketId::from_key("1");
        let relations =
            RelationManager::neighbor_relations(&order, &IndexValue::from_key("2"), &parent);

        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].kind, RelationType::GreaterThan);
        assert_eq!(relations[0].target.to_key(), "1/4");
        assert_eq!(relations[0].value.as_ref().map(|v| v.key.as_str()), Some("2"));
    }

    #[test]
    fn test_equal_relations() {
        let (order, slots) = order_of(&["1", "01"]);
        let relations = RelationManager::equal_relations(&order, slots[1], &BucketId::root());
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].0, slots[0]);
        assert_eq!(relations[0].1.kind, RelationType::EqualTo);
        assert_eq!(relations[0].1.target.to_key(), "1");
    }
}
