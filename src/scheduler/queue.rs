//! Bounded, deduplicated FIFO of pending tiles.

use crate::region::{tile_key, TileCoord};
use std::collections::{HashSet, VecDeque};

/// One tile waiting to be seeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub world: String,
    pub tile: TileCoord,
    /// Tile key, also the dedup key.
    pub id: String,
}

impl WorkItem {
    pub fn new(world: impl Into<String>, tile: TileCoord) -> Self {
        let world = world.into();
        let id = tile_key(&world, tile);
        Self { world, tile, id }
    }
}

/// Work queue where an id is pending at most once.
///
/// An id leaves the pending set exactly once: when popped. Pushes past
/// capacity are dropped, not remembered.
#[derive(Debug)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
    enqueued: HashSet<String>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            enqueued: HashSet::new(),
            capacity,
        }
    }

    /// Enqueue unless already pending or full. Returns whether it was added.
    pub fn push(&mut self, item: WorkItem) -> bool {
        if self.is_saturated() || self.enqueued.contains(&item.id) {
            return false;
        }
        self.enqueued.insert(item.id.clone());
        self.items.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        let item = self.items.pop_front()?;
        self.enqueued.remove(&item.id);
        Some(item)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.enqueued.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }

    pub fn is_saturated(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_until_popped() {
        let mut q = WorkQueue::new(10);
        assert!(q.push(WorkItem::new("w", TileCoord::new(0, 0))));
        assert!(!q.push(WorkItem::new("w", TileCoord::new(0, 0))));
        assert!(q.push(WorkItem::new("other", TileCoord::new(0, 0))));
        assert_eq!(q.len(), 2);

        let first = q.pop().unwrap();
        assert_eq!(first.id, "w|tile|0,0");
        assert!(!q.contains(&first.id));
        assert!(q.push(first));
    }

    #[test]
    fn test_capacity_drops() {
        let mut q = WorkQueue::new(2);
        assert!(q.push(WorkItem::new("w", TileCoord::new(0, 0))));
        assert!(q.push(WorkItem::new("w", TileCoord::new(1, 0))));
        assert!(q.is_saturated());
        assert!(!q.push(WorkItem::new("w", TileCoord::new(2, 0))));
        assert!(!q.contains("w|tile|2,0"), "dropped items are not remembered");
        assert_eq!(q.remaining(), 0);
    }
}
