//! Exact brute-force kNN over a concurrent key → vector map.
//!
//! Entries are held as `Arc<Vector>`. Readers clone the `Arc`s under the read
//! lock and score the snapshot with no lock held; writers copy-on-write via
//! `Arc::make_mut`, so a snapshot never observes a half-applied mutation.

use crate::config::IndexConfig;
use crate::similarity::{Metric, Similarity};
use crate::vector::Vector;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Concurrent latent index with exact top-k queries.
///
/// # Example
///
/// ```rust
/// use latent_horizon::{KnnIndex, Metric, SeededVectors};
///
/// let seeds = SeededVectors::new();
/// let index = KnnIndex::new();
/// index.upsert("apple", seeds.noise("apple"));
/// index.upsert("pear", seeds.noise("pear"));
///
/// let hits = index.knn(1, &seeds.noise("apple"), Metric::Cosine);
/// assert_eq!(hits[0].0, "apple");
/// ```
#[derive(Debug)]
pub struct KnnIndex {
    entries: RwLock<HashMap<String, Arc<Vector>>>,
    write_warn: Duration,
}

impl KnnIndex {
    /// Create an empty index with default settings.
    pub fn new() -> Self {
        Self::with_config(&IndexConfig::default())
    }

    pub fn with_config(config: &IndexConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            write_warn: Duration::from_millis(config.write_warn_ms),
        }
    }

    /// Build an index pre-filled with `entries`.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vector)>,
    {
        let index = Self::new();
        {
            let mut map = index.entries.write();
            for (key, v) in entries {
                map.insert(key, Arc::new(v));
            }
        }
        index
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert or replace the vector stored under `key`.
    ///
    /// Waits up to the configured threshold for the write lock, then logs a
    /// warning and blocks until it is acquired.
    pub fn upsert(&self, key: impl Into<String>, v: Vector) {
        let key = key.into();
        let started = Instant::now();
        let mut map = match self.entries.try_write_for(self.write_warn) {
            Some(guard) => guard,
            None => {
                warn!(
                    key = %key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "knn write lock timeout on upsert, blocking"
                );
                self.entries.write()
            }
        };
        map.insert(key, Arc::new(v));
    }

    /// Add `delta` to the vector under `key`, starting from zero if absent.
    pub fn delta_update(&self, key: &str, delta: &Vector) {
        let mut map = self.entries.write();
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Vector::zeros()));
        Arc::make_mut(entry).add(delta);
    }

    /// Move every named vector `factor` of the way toward `target`.
    ///
    /// Missing keys start at zero; `factor = 1` replaces them with `target`.
    pub fn converge<S: AsRef<str>>(&self, keys: &[S], target: &Vector, factor: f32) {
        let mut map = self.entries.write();
        for key in keys {
            let entry = map
                .entry(key.as_ref().to_string())
                .or_insert_with(|| Arc::new(Vector::zeros()));
            Arc::make_mut(entry).converge_toward(target, factor);
        }
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// An independent copy of the vector under `key`.
    pub fn get(&self, key: &str) -> Option<Vector> {
        self.entries.read().get(key).map(|v| (**v).clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of stored keys.
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Whether any key starts with `prefix`.
    pub fn any_with_prefix(&self, prefix: &str) -> bool {
        self.entries.read().keys().any(|k| k.starts_with(prefix))
    }

    /// Point-in-time view of every entry.
    pub(crate) fn view(&self) -> Vec<(String, Arc<Vector>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// The `k` entries scoring highest against `query`, best first.
    ///
    /// Returns `min(k, size())` results. Scores are metric-dependent and
    /// always "larger is closer" (Euclidean is the negated squared
    /// distance). Order among equal scores is unspecified.
    pub fn knn(&self, k: usize, query: &Vector, metric: Metric) -> Vec<(String, f32)> {
        if k == 0 {
            return Vec::new();
        }

        let snapshot = self.view();
        let mut heap: BinaryHeap<Reverse<Scored>> =
            BinaryHeap::with_capacity(k.min(snapshot.len()) + 1);

        for (key, v) in snapshot {
            let score = Similarity::score(&v, query, metric);
            if heap.len() < k {
                heap.push(Reverse(Scored::new(key, score)));
            } else if let Some(Reverse(worst)) = heap.peek() {
                if score > worst.score.0 {
                    heap.pop();
                    heap.push(Reverse(Scored::new(key, score)));
                }
            }
        }

        let mut out: Vec<Scored> = heap.into_iter().map(|Reverse(s)| s).collect();
        out.sort_unstable_by(|a, b| b.score.cmp(&a.score));
        out.into_iter().map(|s| (s.key, s.score.0)).collect()
    }

    /// Keys of the `k` nearest entries by Euclidean distance.
    pub fn nearest_keys(&self, k: usize, query: &Vector) -> Vec<String> {
        self.knn(k, query, Metric::Euclidean)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Visit every entry with an independent copy, holding no lock while
    /// `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, Vector),
    {
        for (key, v) in self.view() {
            f(&key, (*v).clone());
        }
    }
}

impl Default for KnnIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap entry ordered by score only.
struct Scored {
    key: String,
    score: OrderedFloat<f32>,
}

impl Scored {
    fn new(key: String, score: f32) -> Self {
        Self {
            key,
            score: OrderedFloat(score),
        }
    }
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score)
    }
}
