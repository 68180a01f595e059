//! Lossless index persistence.
//!
//! Vectors are stored as raw IEEE-754 bit patterns, never decimal text, so a
//! save/load cycle reproduces every component exactly.

use super::knn::KnnIndex;
use crate::error::{LatentError, Result};
use crate::region::SubRegion;
use crate::vector::{Vector, LATENT_DIM};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// On-disk shape of an index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// key → 384 bit patterns
    pub entries: BTreeMap<String, Vec<u32>>,
    /// Set once the initial bulk seed has run.
    #[serde(default)]
    pub populated: bool,
    /// Registered host regions, keyed by sub-region id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regions: BTreeMap<String, SubRegion>,
}

impl IndexSnapshot {
    /// Decode every entry, rejecting any with the wrong width.
    pub fn vectors(&self) -> Result<Vec<(String, Vector)>> {
        self.entries
            .iter()
            .map(|(key, bits)| {
                if bits.len() != LATENT_DIM {
                    return Err(LatentError::Snapshot(format!(
                        "entry {:?} has {} values, expected {}",
                        key,
                        bits.len(),
                        LATENT_DIM
                    )));
                }
                Ok((key.clone(), Vector::from_bits(bits)?))
            })
            .collect()
    }

    /// Save as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl KnnIndex {
    /// Point-in-time snapshot of every entry (`populated` is left false).
    pub fn snapshot(&self) -> IndexSnapshot {
        let entries = self
            .view()
            .into_iter()
            .map(|(key, v)| (key, v.to_bits()))
            .collect();
        IndexSnapshot {
            entries,
            ..IndexSnapshot::default()
        }
    }

    /// Rebuild an index from a snapshot.
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Result<Self> {
        Ok(KnnIndex::from_entries(snapshot.vectors()?))
    }

    /// Upsert every snapshot entry into this index. Returns how many.
    ///
    /// Nothing is written if any entry is malformed.
    pub fn load_snapshot(&self, snapshot: &IndexSnapshot) -> Result<usize> {
        let vectors = snapshot.vectors()?;
        let loaded = vectors.len();
        for (key, v) in vectors {
            self.upsert(key, v);
        }
        Ok(loaded)
    }
}

// =============================================================================
// PopulatedIndex
// =============================================================================

/// A [`KnnIndex`] plus the "initial bulk seed has run" flag.
///
/// The flag travels with the snapshot, so seeding stays one-shot across
/// restarts. It is only raised once the seeder has returned.
#[derive(Debug, Default)]
pub struct PopulatedIndex {
    index: KnnIndex,
    populated: AtomicBool,
    seeding: Mutex<()>,
}

impl PopulatedIndex {
    pub fn new(index: KnnIndex) -> Self {
        Self {
            index,
            populated: AtomicBool::new(false),
            seeding: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &KnnIndex {
        &self.index
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Run `seeder` unless a previous run already completed.
    ///
    /// Returns `true` if the seeder ran. Concurrent callers wait for the
    /// running seed; a seeder that panics leaves the index unpopulated.
    pub fn populate_if_needed<F>(&self, seeder: F) -> bool
    where
        F: FnOnce(&KnnIndex),
    {
        let _seeding = self.seeding.lock();
        if self.is_populated() {
            debug!("index already populated, skipping seed");
            return false;
        }
        seeder(&self.index);
        self.populated.store(true, Ordering::Release);
        info!(entries = self.index.size(), "index seeded");
        true
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let mut snapshot = self.index.snapshot();
        snapshot.populated = self.is_populated();
        snapshot
    }

    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Result<Self> {
        Ok(Self {
            index: KnnIndex::from_snapshot(snapshot)?,
            populated: AtomicBool::new(snapshot.populated),
            seeding: Mutex::new(()),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.snapshot().save(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_snapshot(&IndexSnapshot::load(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded::SeededVectors;

    #[test]
    fn test_snapshot_preserves_bits() {
        let seeds = SeededVectors::new();
        let index = KnnIndex::new();
        let mut odd = seeds.noise("odd");
        odd.set(0, f32::MIN_POSITIVE);
        odd.set(1, -0.0);
        odd.set(2, f32::MAX);
        index.upsert("odd", odd.clone());
        index.upsert("plain", seeds.noise("plain"));

        let restored = KnnIndex::from_snapshot(&index.snapshot()).unwrap();
        assert_eq!(restored.size(), 2);
        assert_eq!(restored.get("odd").unwrap().to_bits(), odd.to_bits());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let stored = PopulatedIndex::default();
        assert!(stored.populate_if_needed(|index| {
            index.upsert("a", SeededVectors::new().noise("a"));
        }));
        stored.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"populated\":true"));

        let loaded = PopulatedIndex::load(&path).unwrap();
        assert!(loaded.is_populated());
        assert_eq!(loaded.index().get("a"), stored.index().get("a"));
    }

    #[test]
    fn test_populate_runs_once() {
        let stored = PopulatedIndex::default();
        let mut runs = 0;
        stored.populate_if_needed(|_| runs += 1);
        stored.populate_if_needed(|_| runs += 1);
        assert_eq!(runs, 1);

        let restored = PopulatedIndex::from_snapshot(&stored.snapshot()).unwrap();
        assert!(!restored.populate_if_needed(|_| panic!("seeder must not rerun")));
    }

    #[test]
    fn test_flag_raised_only_after_seeding() {
        let stored = PopulatedIndex::default();
        stored.populate_if_needed(|index| {
            index.upsert("half", SeededVectors::new().noise("half"));
            let mid = stored.snapshot();
            assert!(!mid.populated, "a mid-seed snapshot must not claim completion");
            assert_eq!(mid.entries.len(), 1);
        });
        assert!(stored.snapshot().populated);
    }

    #[test]
    fn test_panicking_seeder_can_be_retried() {
        let stored = PopulatedIndex::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            stored.populate_if_needed(|index| {
                index.upsert("partial", SeededVectors::new().noise("partial"));
                panic!("backend went away");
            })
        }));
        assert!(outcome.is_err());
        assert!(!stored.is_populated());

        assert!(stored.populate_if_needed(|index| {
            index.upsert("full", SeededVectors::new().noise("full"));
        }));
        assert!(stored.is_populated());
        assert!(stored.index().contains("full"));
    }

    #[test]
    fn test_wrong_width_rejected() {
        let mut snapshot = IndexSnapshot::default();
        snapshot.entries.insert("short".to_string(), vec![0u32; 10]);
        let err = KnnIndex::from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, LatentError::Snapshot(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            IndexSnapshot::load(&path).unwrap_err(),
            LatentError::Snapshot(_)
        ));
    }
}
