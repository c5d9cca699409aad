//! Sibling Ordering
//!
//! Doubly linked list of sibling index values, kept sorted by
//! [`IndexValue::compare`]. Nodes live in an arena and link to each other by
//! slot index, so neighbors are one hop away from any slot.
//!
//! ```text
//! head                                   tail
//!  [1] <-> [3] <-> [3'] <-> [5] <-> [9]
//! ```
//!
//! Equal values keep insertion order: a new value goes before the first
//! sibling that compares strictly greater.

use crate::model::IndexValue;
use std::cmp::Ordering;

/// Position of a sibling in the arena
pub type SlotId = usize;

#[derive(Debug, Clone)]
struct Slot<T> {
    value: IndexValue,
    item: T,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Sorted sibling list with O(1) neighbor access
#[derive(Debug, Clone)]
pub struct SiblingOrder<T> {
    slots: Vec<Slot<T>>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

impl<T> Default for SiblingOrder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SiblingOrder<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn head(&self) -> Option<SlotId> {
        self.head
    }

    pub fn tail(&self) -> Option<SlotId> {
        self.tail
    }

    pub fn value(&self, slot: SlotId) -> &IndexValue {
        &self.slots[slot].value
    }

    pub fn item(&self, slot: SlotId) -> &T {
        &self.slots[slot].item
    }

    pub fn item_mut(&mut self, slot: SlotId) -> &mut T {
        &mut self.slots[slot].item
    }

    pub fn prev(&self, slot: SlotId) -> Option<SlotId> {
        self.slots[slot].prev
    }

    pub fn next(&self, slot: SlotId) -> Option<SlotId> {
        self.slots[slot].next
    }

    /// Insert in sorted position and return the new slot
    pub fn insert(&mut self, value: IndexValue, item: T) -> SlotId {
        let before = self.find_first(|v| v.compare(&value) == Ordering::Greater);
        let slot = self.slots.len();

        match before {
            Some(next) => {
                let prev = self.slots[next].prev;
                self.slots.push(Slot {
                    value,
                    item,
                    prev,
                    next: Some(next),
                });
                self.slots[next].prev = Some(slot);
                match prev {
                    Some(p) => self.slots[p].next = Some(slot),
                    None => self.head = Some(slot),
                }
            }
            None => {
                let prev = self.tail;
                self.slots.push(Slot {
                    value,
                    item,
                    prev,
                    next: None,
                });
                match prev {
                    Some(p) => self.slots[p].next = Some(slot),
                    None => self.head = Some(slot),
                }
                self.tail = Some(slot);
            }
        }

        slot
    }

    /// First slot (head to tail) whose value matches
    pub fn find_first(&self, predicate: impl Fn(&IndexValue) -> bool) -> Option<SlotId> {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            if predicate(&self.slots[slot].value) {
                return Some(slot);
            }
            cursor = self.slots[slot].next;
        }
        None
    }

    /// Last slot (tail to head) whose value matches
    pub fn find_last(&self, predicate: impl Fn(&IndexValue) -> bool) -> Option<SlotId> {
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            if predicate(&self.slots[slot].value) {
                return Some(slot);
            }
            cursor = self.slots[slot].prev;
        }
        None
    }

    /// Linear traversal in sorted order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            order: self,
            cursor: self.head,
        }
    }
}

/// Iterator over `(slot, value, item)` in sorted order
pub struct Iter<'a, T> {
    order: &'a SiblingOrder<T>,
    cursor: Option<SlotId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotId, &'a IndexValue, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let entry = &self.order.slots[slot];
        self.cursor = entry.next;
        Some((slot, &entry.value, &entry.item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<T>(order: &SiblingOrder<T>) -> Vec<String> {
        order.iter().map(|(_, v, _)| v.key.clone()).collect()
    }

    #[test]
    fn test_insert_keeps_sorted() {
        let mut order = SiblingOrder::new();
        for (i, v) in [5, 1, 9, 3, 7].iter().enumerate() {
            order.insert(IndexValue::integer(*v), i);
        }
        assert_eq!(keys(&order), vec!["1", "3", "5", "7", "9"]);
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_any_insertion_order_sorts() {
        let orders: [[i64; 4]; 4] = [[1, 2, 3, 4], [4, 3, 2, 1], [2, 4, 1, 3], [3, 1, 4, 2]];
        for values in orders {
            let mut order = SiblingOrder::new();
            for v in values {
                order.insert(IndexValue::integer(v), ());
            }
            assert_eq!(keys(&order), vec!["1", "2", "3", "4"], "from {:?}", values);
        }
    }

    #[test]
    fn test_neighbors_are_linked() {
        let mut order = SiblingOrder::new();
        let five = order.insert(IndexValue::integer(5), ());
        let one = order.insert(IndexValue::integer(1), ());
        let three = order.insert(IndexValue::integer(3), ());

        assert_eq!(order.head(), Some(one));
        assert_eq!(order.tail(), Some(five));
        assert_eq!(order.prev(three), Some(one));
        assert_eq!(order.next(three), Some(five));
        assert_eq!(order.prev(one), None);
        assert_eq!(order.next(five), None);
    }

    #[test]
    fn test_equal_values_keep_insertion_order() {
        let mut order = SiblingOrder::new();
        order.insert(IndexValue::from_key("1"), ());
        order.insert(IndexValue::from_key("2"), ());
        order.insert(IndexValue::from_key("01"), ());

        assert_eq!(keys(&order), vec!["1", "01", "2"]);
    }

    #[test]
    fn test_find_first_and_last() {
        let mut order = SiblingOrder::new();
        for v in [10, 20, 30] {
            order.insert(IndexValue::integer(v), v);
        }

        let first = order.find_first(|v| v.value.as_millis() > Some(15)).unwrap();
        assert_eq!(*order.item(first), 20);

        let last = order.find_last(|v| v.value.as_millis() <= Some(25)).unwrap();
        assert_eq!(*order.item(last), 20);

        assert!(order.find_last(|v| v.value.as_millis() < Some(10)).is_none());
    }
}
