//! Background population of the region index around viewers.
//!
//! Every tick:
//!
//! 1. **collect**: finished embeddings are jittered and registered.
//! 2. **produce**: tiles around each viewer with no registered sub-region
//!    and not already pending are enqueued, up to the queue cap.
//! 3. **consume**: up to `regions_per_tick` tiles are classified and one
//!    embedding request per unregistered sub-region is issued.
//! 4. **adapt**: every `adjust_every_ticks` ticks, and only while work is
//!    pending, the throughput controller retunes `regions_per_tick`.
//!
//! The tick never waits on an embedding; failures are logged and the tile
//! is rediscovered on a later pass.

use super::control::ThroughputController;
use super::host::{HostLoad, HostWorld};
use super::queue::{WorkItem, WorkQueue};
use crate::config::SchedulerConfig;
use crate::embedding::{EmbeddingCache, EmbeddingFuture};
use crate::region::{RegionStore, SubRegion, TileCoord};
use crate::seeded::SeededVectors;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read-only view of the seeder for status reporting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeederStatus {
    pub queue_len: usize,
    pub max_queue: usize,
    pub saturated: bool,
    pub busy: bool,
    pub pending_embeddings: usize,
    pub regions_per_tick: usize,
    pub latency_ratio: f64,
    pub last_fill: f64,
}

struct PendingRegion {
    region: SubRegion,
    future: EmbeddingFuture,
}

/// Counts from one [`HorizonSeeder::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub registered: usize,
    pub enqueued: usize,
    pub requested: usize,
    pub adjusted: bool,
}

/// Discovers empty tiles near viewers and fills them with embeddings.
pub struct HorizonSeeder {
    config: SchedulerConfig,
    queue: WorkQueue,
    controller: ThroughputController,
    store: Arc<RegionStore>,
    cache: Arc<EmbeddingCache>,
    seeds: SeededVectors,
    pending: HashMap<String, PendingRegion>,
}

impl HorizonSeeder {
    pub fn new(config: SchedulerConfig, store: Arc<RegionStore>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            queue: WorkQueue::new(config.max_queue),
            controller: ThroughputController::new(&config),
            config,
            store,
            cache,
            seeds: SeededVectors::new(),
            pending: HashMap::new(),
        }
    }

    /// Use a specific seed for the per-region jitter.
    pub fn with_seeds(mut self, seeds: SeededVectors) -> Self {
        self.seeds = seeds;
        self
    }

    /// Run one scheduling tick.
    pub fn tick<H: HostWorld + ?Sized>(&mut self, host: &H, tick_number: u64) -> TickReport {
        let mut report = TickReport {
            registered: self.collect(),
            enqueued: self.produce(host, tick_number),
            requested: self.consume(host),
            adjusted: false,
        };

        if !self.queue.is_empty() && tick_number % self.config.adjust_every_ticks.max(1) == 0 {
            self.adapt(&HostLoad::sample(host));
            report.adjusted = true;
        }
        report
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Register every finished embedding. Returns how many were new.
    pub fn collect(&mut self) -> usize {
        let store = &self.store;
        let seeds = self.seeds;
        let magnitude = self.config.jitter_magnitude;
        let mut registered = 0;

        self.pending.retain(|id, pending| {
            let Some(result) = pending.future.clone().now_or_never() else {
                return true;
            };
            match result {
                Ok(mut embedding) => {
                    embedding.add(&seeds.jitter(id, magnitude));
                    if store.put_if_absent(pending.region.clone(), embedding) {
                        registered += 1;
                    }
                }
                Err(e) => {
                    warn!(region = %id, error = %e, "region embedding failed");
                }
            }
            false
        });

        if registered > 0 {
            debug!(registered, "regions registered");
        }
        registered
    }

    /// Enqueue empty tiles around every viewer. Returns how many were added.
    pub fn produce<H: HostWorld + ?Sized>(&mut self, host: &H, tick_number: u64) -> usize {
        let radius = self.config.radius_tiles;
        let mut added = 0;

        for world in host.worlds() {
            let viewers = host.viewers(&world);
            if viewers.is_empty() {
                continue;
            }
            let start = (tick_number % viewers.len() as u64) as usize;

            for n in 0..viewers.len() {
                if self.queue.is_saturated() {
                    return added;
                }
                let center = viewers[(start + n) % viewers.len()].tile();
                for z in center.z - radius..=center.z + radius {
                    for x in center.x - radius..=center.x + radius {
                        if self.queue.is_saturated() {
                            return added;
                        }
                        let tile = TileCoord::new(x, z);
                        if self.store.has_any_in_tile(&world, tile) {
                            continue;
                        }
                        if self.queue.push(WorkItem::new(world.as_str(), tile)) {
                            added += 1;
                        }
                    }
                }
            }
        }
        added
    }

    /// Dispatch up to `regions_per_tick` tiles. Returns requests issued.
    pub fn consume<H: HostWorld + ?Sized>(&mut self, host: &H) -> usize {
        if !self.cache.is_ready() {
            debug!(queued = self.queue.len(), "embedding cache not ready, holding queue");
            return 0;
        }

        let mut requested = 0;
        for _ in 0..self.controller.regions_per_tick() {
            let Some(item) = self.queue.pop() else {
                break;
            };
            for (category, bounds) in host.classify_tile(&item.world, item.tile) {
                let region = SubRegion::new(item.world.as_str(), item.tile, category, vec![bounds]);
                let id = region.id();
                if self.pending.contains_key(&id) || self.store.contains(&id) {
                    continue;
                }
                let prompt = format!(
                    "region coarse category={} world={}",
                    region.category, region.world
                );
                let future = self.cache.get_embedding(&prompt);
                self.pending.insert(id, PendingRegion { region, future });
                requested += 1;
            }
        }
        requested
    }

    /// Retune throughput for a load reading.
    pub fn adapt(&mut self, load: &HostLoad) -> usize {
        let before = self.controller.regions_per_tick();
        let after = self.controller.adjust(load);
        if before != after {
            info!(
                from = before,
                to = after,
                queue = self.queue.len(),
                "seeder throughput changed"
            );
        }
        after
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn max_queue(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_saturated(&self) -> bool {
        self.queue.is_saturated()
    }

    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn regions_per_tick(&self) -> usize {
        self.controller.regions_per_tick()
    }

    pub fn pending_embeddings(&self) -> usize {
        self.pending.len()
    }

    pub fn controller(&self) -> &ThroughputController {
        &self.controller
    }

    pub fn store(&self) -> &Arc<RegionStore> {
        &self.store
    }

    pub fn status(&self) -> SeederStatus {
        SeederStatus {
            queue_len: self.queue_len(),
            max_queue: self.max_queue(),
            saturated: self.is_saturated(),
            busy: self.is_busy(),
            pending_embeddings: self.pending_embeddings(),
            regions_per_tick: self.regions_per_tick(),
            latency_ratio: self.controller.latency_ratio(),
            last_fill: self.controller.last_fill(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::embedding::HashedBackend;
    use crate::index::KnnIndex;
    use crate::region::{CellBox, SurfaceProbe};
    use crate::scheduler::host::ViewerLocation;
    use glam::DVec3;
    use std::time::{Duration, Instant};

    struct FlatHost {
        viewers: Vec<ViewerLocation>,
        tick_ms: f64,
        fill: f64,
    }

    impl SurfaceProbe for FlatHost {
        fn surface_at(&self, _world: &str, x: i32, z: i32) -> Option<DVec3> {
            Some(DVec3::new(x as f64, 64.0, z as f64))
        }
    }

    impl HostWorld for FlatHost {
        fn worlds(&self) -> Vec<String> {
            vec!["overworld".to_string()]
        }
        fn viewers(&self, _world: &str) -> Vec<ViewerLocation> {
            self.viewers.clone()
        }
        fn classify_tile(&self, _world: &str, tile: TileCoord) -> Vec<(String, CellBox)> {
            let wet = if (tile.x + tile.z) % 2 == 0 { "lake" } else { "marsh" };
            vec![
                ("plains".to_string(), CellBox::new(0, 0, 31, 15)),
                (wet.to_string(), CellBox::new(0, 16, 31, 31)),
            ]
        }
        fn resource_fill(&self) -> f64 {
            self.fill
        }
        fn average_tick_ms(&self) -> f64 {
            self.tick_ms
        }
        fn target_tick_ms(&self) -> f64 {
            50.0
        }
        fn is_local_host(&self) -> bool {
            false
        }
    }

    fn host(tick_ms: f64) -> FlatHost {
        FlatHost {
            viewers: vec![ViewerLocation::new("alice", 5, 5)],
            tick_ms,
            fill: 1.0,
        }
    }

    fn seeder(config: SchedulerConfig) -> HorizonSeeder {
        let store = Arc::new(RegionStore::new(Arc::new(KnnIndex::new())));
        let cache = Arc::new(EmbeddingCache::new(
            HashedBackend::factory(SeededVectors::new()),
            CacheConfig {
                workers: 2,
                ..CacheConfig::default()
            },
        ));
        cache.start().unwrap();
        HorizonSeeder::new(config, store, cache)
    }

    fn small() -> SchedulerConfig {
        SchedulerConfig {
            radius_tiles: 1,
            ..SchedulerConfig::default()
        }
    }

    fn wait_for_pending(s: &mut HorizonSeeder) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.pending_embeddings() > 0 && Instant::now() < deadline {
            s.collect();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_produce_is_idempotent() {
        let mut s = seeder(small());
        let h = host(10.0);
        assert_eq!(s.produce(&h, 1), 9, "3x3 tiles around the viewer");
        assert_eq!(s.produce(&h, 2), 0);
        assert_eq!(s.queue_len(), 9);
    }

    #[test]
    fn test_produce_respects_cap() {
        let mut s = seeder(SchedulerConfig {
            radius_tiles: 2,
            max_queue: 4,
            ..SchedulerConfig::default()
        });
        assert_eq!(s.produce(&host(10.0), 1), 4);
        assert!(s.is_saturated());
    }

    #[test]
    fn test_overlapping_viewers_share_tiles() {
        let mut s = seeder(small());
        let mut h = host(10.0);
        h.viewers.push(ViewerLocation::new("bob", 40, 5));
        // bob's tile (1,0) is one over: 3x4 union
        assert_eq!(s.produce(&h, 7), 12);
    }

    #[test]
    fn test_tick_populates_store() {
        let mut s = seeder(small());
        let h = host(10.0);
        let report = s.tick(&h, 1);
        assert_eq!(report.enqueued, 9);
        assert_eq!(report.requested, 12, "6 tiles x 2 categories");
        assert_eq!(s.queue_len(), 3);

        wait_for_pending(&mut s);
        assert_eq!(s.store().len(), 12);

        // populated tiles are never rediscovered
        s.tick(&h, 2);
        wait_for_pending(&mut s);
        assert_eq!(s.store().len(), 18);
        assert_eq!(s.produce(&h, 3), 0);
        assert!(!s.is_busy());
    }

    #[test]
    fn test_sibling_regions_are_jittered_apart() {
        let mut s = seeder(small());
        let h = host(10.0);
        s.tick(&h, 1);
        wait_for_pending(&mut s);

        // every tile with the same parity shares a prompt, so identical base
        let index = s.store().index();
        let a = index.get("overworld|tile|-1,-1|plains").unwrap();
        let b = index.get("overworld|tile|0,-1|plains").unwrap();
        assert_ne!(a, b);
        assert!(a.squared_distance(&b) < 1e-5);
    }

    #[test]
    fn test_not_ready_cache_holds_queue() {
        let store = Arc::new(RegionStore::new(Arc::new(KnnIndex::new())));
        let cache = Arc::new(EmbeddingCache::new(
            HashedBackend::factory(SeededVectors::new()),
            CacheConfig::default(),
        ));
        let mut s = HorizonSeeder::new(small(), store, cache);
        let report = s.tick(&host(10.0), 1);
        assert_eq!(report.requested, 0);
        assert_eq!(s.queue_len(), 9);
    }

    #[test]
    fn test_no_adapt_when_idle() {
        let mut s = seeder(small());
        let mut h = host(500.0);
        h.viewers.clear();
        let before = s.regions_per_tick();
        for tick in 0..200 {
            assert!(!s.tick(&h, tick).adjusted);
        }
        assert_eq!(s.regions_per_tick(), before);
    }

    #[test]
    fn test_adapt_only_on_cadence() {
        let mut s = seeder(SchedulerConfig {
            radius_tiles: 6,
            ..SchedulerConfig::default()
        });
        let h = host(500.0);
        assert!(!s.tick(&h, 39).adjusted);
        assert!(s.tick(&h, 40).adjusted);
        assert!(s.regions_per_tick() < 6, "overloaded host backs off");
        assert!(s.status().latency_ratio > 1.8);
    }
}
