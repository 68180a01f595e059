//! # Latent Horizon: latent-space positioning engine
//!
//! Gives world entities positions in a 384-dimensional latent space and
//! projects latent neighbours into a viewer's 3D surroundings through an
//! evolving three-axis basis. Populates the index lazily in the background
//! under adaptive load control.
//!
//! ## Quick Start
//!
//! ```rust
//! use glam::DVec3;
//! use latent_horizon::{HashedBackend, LatentConfig, LatentHorizon, Metric, SeededVectors};
//!
//! let engine = LatentHorizon::new(
//!     LatentConfig::default(),
//!     HashedBackend::factory(SeededVectors::new()),
//! ).unwrap();
//!
//! let me = engine.noise("me");
//! engine.index().upsert("tree", engine.noise("tree"));
//! engine.index().upsert("rock", engine.noise("rock"));
//!
//! // frame of reference pointing at "tree"
//! let mut basis = engine.align_basis(&engine.noise("tree"), None);
//!
//! // walking rotates the frame toward the attunement
//! engine.step_basis(&mut basis, &engine.noise("rock"), DVec3::new(1.0, 0.0, 0.0));
//!
//! // place the nearest entries around the viewer
//! for (key, _score) in engine.index().knn(2, &me, Metric::Euclidean) {
//!     let v = engine.index().get(&key).unwrap();
//!     let p = engine.project(&v, &me, &basis, DVec3::new(0.0, 64.0, 0.0), 8.0);
//!     println!("{} at {:?}", key, p);
//! }
//! ```
//!
//! ## Core Concepts
//!
//! - **Vector**: fixed 384-wide latent position with a cached unit form
//! - **Basis**: three latent axes a viewer projects through
//! - **Integrator**: rotates a basis toward an attunement as the viewer moves
//! - **KnnIndex**: concurrent key → vector store with exact top-k
//! - **EmbeddingCache**: deduplicating async front end to a slow embedder
//! - **HorizonSeeder**: fills empty host tiles near viewers, AIMD-throttled

pub mod basis;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod integrator;
pub mod projection;
pub mod region;
pub mod scheduler;
pub mod seeded;
pub mod similarity;
pub mod vector;
pub mod visibility;

// Re-exports for convenience
pub use basis::Basis;
pub use config::{CacheConfig, IndexConfig, IntegratorConfig, LatentConfig, SchedulerConfig};
pub use embedding::{
    BackendFactory, CacheStats, CacheStatus, EmbeddingBackend, EmbeddingCache, EmbeddingFuture,
    HashedBackend,
};
pub use error::{LatentError, Result};
pub use index::{IndexSnapshot, KnnIndex, PopulatedIndex};
pub use integrator::{BasisIntegrator, MovementTracker};
pub use projection::Projector;
pub use region::{CellBox, RegionStore, SubRegion, SurfaceProbe, TileCoord};
pub use scheduler::{HorizonSeeder, HostLoad, HostWorld, ThroughputController, ViewerLocation};
pub use seeded::SeededVectors;
pub use similarity::{Metric, Similarity};
pub use vector::{Vector, LATENT_DIM};
pub use visibility::{VisibilityDelta, VisibilityTracker};

use glam::DVec3;
use std::hash::Hash;
use std::sync::Arc;

/// The engine: one index, one region registry, one embedding cache.
///
/// Cheap to share: every component is behind an `Arc`, and the index and
/// cache are safe to use from any thread.
pub struct LatentHorizon {
    config: LatentConfig,
    seeds: SeededVectors,
    integrator: BasisIntegrator,
    index: Arc<KnnIndex>,
    regions: Arc<RegionStore>,
    cache: Arc<EmbeddingCache>,
}

impl LatentHorizon {
    /// Build an engine from a validated config and an embedding backend.
    ///
    /// The cache is not started; call [`start`](Self::start).
    pub fn new(config: LatentConfig, factory: impl BackendFactory + 'static) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(KnnIndex::with_config(&config.index));
        Ok(Self {
            seeds: SeededVectors::new(),
            integrator: BasisIntegrator::from_config(&config.integrator),
            regions: Arc::new(RegionStore::new(Arc::clone(&index))),
            cache: Arc::new(EmbeddingCache::new(factory, config.cache.clone())),
            index,
            config,
        })
    }

    /// Use a specific global seed for hashed vectors.
    ///
    /// Same seed, same vectors, on every run and machine.
    pub fn with_seed(mut self, global_seed: u64) -> Self {
        self.seeds = SeededVectors::with_seed(global_seed);
        self
    }

    pub fn config(&self) -> &LatentConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<KnnIndex> {
        &self.index
    }

    pub fn regions(&self) -> &Arc<RegionStore> {
        &self.regions
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the embedding worker pool.
    pub fn start(&self) -> Result<()> {
        self.cache.start()
    }

    /// Stop the embedding worker pool. Indexed data is kept.
    pub fn shutdown(&self) {
        self.cache.shutdown()
    }

    // =========================================================================
    // Vectors and bases
    // =========================================================================

    /// Deterministic hashed vector for a key.
    pub fn noise(&self, key: &str) -> Vector {
        self.seeds.noise(key)
    }

    /// One-shot orthonormal frame with `i` along `reference`.
    pub fn align_basis(&self, reference: &Vector, attunement: Option<&Vector>) -> Basis {
        Basis::aligned_to(reference, attunement)
    }

    /// Rotate `basis` for a movement of `delta`. Returns whether it changed.
    pub fn step_basis(&self, basis: &mut Basis, attunement: &Vector, delta: DVec3) -> bool {
        self.integrator.step(basis, attunement, delta)
    }

    /// A position-feed tracker using this engine's integrator.
    pub fn movement_tracker<A: Hash + Eq + Clone>(&self) -> MovementTracker<A> {
        MovementTracker::new(self.integrator)
    }

    /// Place `object` in 3D as seen from `viewer`.
    pub fn project(
        &self,
        object: &Vector,
        viewer: &Vector,
        basis: &Basis,
        anchor: DVec3,
        scale: f32,
    ) -> DVec3 {
        Projector::project(object, viewer, basis, anchor, scale)
    }

    // =========================================================================
    // Queries and population
    // =========================================================================

    /// Neighbours of an indexed key, excluding the key itself.
    ///
    /// `None` if the key is not indexed.
    pub fn knn_by_key(&self, k: usize, key: &str, metric: Metric) -> Option<Vec<(String, f32)>> {
        let query = self.index.get(key)?;
        let mut hits = self.index.knn(k.saturating_add(1), &query, metric);
        hits.retain(|(hit, _)| hit != key);
        hits.truncate(k);
        Some(hits)
    }

    /// Embed `text` through the cache and index it under `key` once done.
    ///
    /// Blocks the caller; returns whether the entry was written.
    pub fn embed_and_upsert(&self, key: &str, text: &str) -> bool {
        match self.cache.get_embedding_blocking(text) {
            Some(v) => {
                self.index.upsert(key, v);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the index and region registry.
    pub fn snapshot(&self) -> IndexSnapshot {
        self.regions.snapshot()
    }

    /// Load a snapshot taken by [`snapshot`](Self::snapshot). Restored tiles
    /// count as populated, so the seeder does not rediscover them.
    pub fn restore(&self, snapshot: &IndexSnapshot) -> Result<usize> {
        self.regions.restore(snapshot)
    }

    /// A background seeder over this engine's regions and cache.
    pub fn seeder(&self) -> HorizonSeeder {
        HorizonSeeder::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.regions),
            Arc::clone(&self.cache),
        )
        .with_seeds(self.seeds)
    }
}
