//! Per-viewer visible set tracking.
//!
//! Each update takes the `k` entries nearest (Euclidean) to the viewer's
//! latent position and reports only what changed since the last update,
//! which is what a remote viewer needs to stay in sync.

use crate::index::KnnIndex;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Changes to a viewer's visible set. Vectors serialize as exact bit
/// patterns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisibilityDelta {
    /// Newly visible keys with their vectors, nearest first.
    pub added: Vec<(String, Vector)>,
    /// Keys no longer visible, sorted.
    pub removed: Vec<String>,
}

impl VisibilityDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Remembers what each viewer was last told it can see.
#[derive(Debug)]
pub struct VisibilityTracker<V> {
    visible: HashMap<V, HashSet<String>>,
}

impl<V: Hash + Eq + Clone> VisibilityTracker<V> {
    pub fn new() -> Self {
        Self {
            visible: HashMap::new(),
        }
    }

    /// Recompute `viewer`'s visible set around `position`.
    pub fn update(
        &mut self,
        viewer: &V,
        index: &KnnIndex,
        position: &Vector,
        k: usize,
    ) -> VisibilityDelta {
        let nearest = index.nearest_keys(k, position);
        self.apply(viewer, nearest, |key| index.get(key))
    }

    fn apply<F>(&mut self, viewer: &V, nearest: Vec<String>, lookup: F) -> VisibilityDelta
    where
        F: Fn(&str) -> Option<Vector>,
    {
        let previous = self.visible.entry(viewer.clone()).or_default();

        let mut delta = VisibilityDelta::default();
        let mut current = HashSet::with_capacity(nearest.len());
        for key in nearest {
            if previous.contains(&key) {
                current.insert(key);
                continue;
            }
            // an entry removed since the query is neither reported nor
            // remembered, so it is offered again if it comes back
            if let Some(v) = lookup(&key) {
                delta.added.push((key.clone(), v));
                current.insert(key);
            }
        }

        delta.removed = previous
            .iter()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();
        delta.removed.sort();

        if !delta.is_empty() {
            *previous = current;
        }
        delta
    }

    /// Keys `viewer` currently sees.
    pub fn visible(&self, viewer: &V) -> Option<&HashSet<String>> {
        self.visible.get(viewer)
    }

    /// Drop a viewer that left or disconnected.
    pub fn forget(&mut self, viewer: &V) {
        self.visible.remove(viewer);
    }

    pub fn viewers(&self) -> usize {
        self.visible.len()
    }
}

impl<V: Hash + Eq + Clone> Default for VisibilityTracker<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32) -> Vector {
        let mut v = Vector::zeros();
        v.set(0, x);
        v
    }

    fn line() -> KnnIndex {
        let index = KnnIndex::new();
        for n in 0..10 {
            index.upsert(format!("p{}", n), at(n as f32));
        }
        index
    }

    #[test]
    fn test_first_update_adds_nearest() {
        let index = line();
        let mut tracker = VisibilityTracker::new();
        let delta = tracker.update(&"alice", &index, &at(0.1), 3);
        let keys: Vec<&str> = delta.added.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p0", "p1", "p2"]);
        assert!(delta.removed.is_empty());
        assert_eq!(delta.added[1].1, at(1.0));
    }

    #[test]
    fn test_moving_reports_only_changes() {
        let index = line();
        let mut tracker = VisibilityTracker::new();
        tracker.update(&1u8, &index, &at(0.1), 3);

        let delta = tracker.update(&1u8, &index, &at(2.9), 3);
        let added: Vec<&str> = delta.added.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(added, vec!["p3", "p4"]);
        assert_eq!(delta.removed, vec!["p0", "p1"]);

        let still = tracker.update(&1u8, &index, &at(2.9), 3);
        assert!(still.is_empty());
        assert_eq!(tracker.visible(&1u8).unwrap().len(), 3);
    }

    #[test]
    fn test_forget_resends_everything() {
        let index = line();
        let mut tracker = VisibilityTracker::new();
        tracker.update(&"bob", &index, &at(5.0), 2);
        tracker.forget(&"bob");
        assert_eq!(tracker.viewers(), 0);
        assert_eq!(tracker.update(&"bob", &index, &at(5.0), 2).added.len(), 2);
    }

    #[test]
    fn test_vanished_entry_is_offered_later() {
        let index = line();
        let mut tracker = VisibilityTracker::new();
        let nearest = vec!["p0".to_string(), "p1".to_string()];

        // p1 disappears between the query and the copy
        let delta = tracker.apply(&"carol", nearest.clone(), |key| {
            if key == "p1" {
                None
            } else {
                index.get(key)
            }
        });
        assert_eq!(delta.added.len(), 1);
        assert!(!tracker.visible(&"carol").unwrap().contains("p1"));

        let again = tracker.apply(&"carol", nearest, |key| index.get(key));
        let added: Vec<&str> = again.added.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(added, vec!["p1"]);
        assert!(again.removed.is_empty());
    }

    #[test]
    fn test_delta_serializes_bits() {
        let index = line();
        let mut tracker = VisibilityTracker::new();
        let delta = tracker.update(&0, &index, &at(0.0), 1);
        let json = serde_json::to_string(&delta).unwrap();
        let back: VisibilityDelta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, delta);
    }
}
