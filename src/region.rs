//! Host-space regions and their latent registry.
//!
//! Host space is cut into square tiles of [`TILE_CELLS`]×[`TILE_CELLS`]
//! cells. A tile is split into sub-regions by category (whatever the host
//! classifies cells by), each covering one or more [`CellBox`]es in
//! tile-local coordinates.
//!
//! Keys:
//!
//! ```text
//! tile        <world>|tile|<x>,<z>
//! sub-region  <world>|tile|<x>,<z>|<category>
//! ```

use crate::error::{LatentError, Result};
use crate::index::{IndexSnapshot, KnnIndex};
use crate::vector::Vector;
use glam::DVec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Cells per tile side.
pub const TILE_CELLS: i32 = 32;

/// World units per cell side.
pub const CELL_SIZE: f64 = 16.0;

// =============================================================================
// Coordinates
// =============================================================================

/// Tile coordinate (cell coordinate floor-divided by [`TILE_CELLS`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing the global cell `(cell_x, cell_z)`.
    pub fn containing(cell_x: i32, cell_z: i32) -> Self {
        Self {
            x: cell_x.div_euclid(TILE_CELLS),
            z: cell_z.div_euclid(TILE_CELLS),
        }
    }

    /// Global cell for a tile-local one.
    pub fn to_global(&self, local_x: i32, local_z: i32) -> (i32, i32) {
        (self.x * TILE_CELLS + local_x, self.z * TILE_CELLS + local_z)
    }
}

pub fn tile_key(world: &str, tile: TileCoord) -> String {
    format!("{}|tile|{},{}", world, tile.x, tile.z)
}

pub fn sub_region_id(world: &str, tile: TileCoord, category: &str) -> String {
    format!("{}|{}", tile_key(world, tile), category)
}

/// Inclusive rectangle of tile-local cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBox {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
}

impl CellBox {
    pub fn new(min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
        }
    }

    /// A single cell.
    pub fn cell(x: i32, z: i32) -> Self {
        Self::new(x, z, x, z)
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i32 {
        self.max_z - self.min_z + 1
    }

    pub fn area(&self) -> i32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.min_x + self.max_x) / 2, (self.min_z + self.max_z) / 2)
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    /// Grow to cover `(x, z)`.
    pub fn include(&mut self, x: i32, z: i32) {
        self.min_x = self.min_x.min(x);
        self.min_z = self.min_z.min(z);
        self.max_x = self.max_x.max(x);
        self.max_z = self.max_z.max(z);
    }
}

/// Bounding box per category over `(local_x, local_z, category)` cells,
/// ordered by category.
pub fn category_bounds<I, S>(cells: I) -> Vec<(String, CellBox)>
where
    I: IntoIterator<Item = (i32, i32, S)>,
    S: Into<String>,
{
    let mut bounds: BTreeMap<String, CellBox> = BTreeMap::new();
    for (x, z, category) in cells {
        bounds
            .entry(category.into())
            .and_modify(|b| b.include(x, z))
            .or_insert_with(|| CellBox::cell(x, z));
    }
    bounds.into_iter().collect()
}

// =============================================================================
// SubRegion
// =============================================================================

/// Finds a standable surface point in a host cell.
pub trait SurfaceProbe {
    fn surface_at(&self, world: &str, cell_x: i32, cell_z: i32) -> Option<DVec3>;
}

/// One category's footprint within a tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubRegion {
    pub world: String,
    pub tile: TileCoord,
    pub category: String,
    pub boxes: Vec<CellBox>,
    #[serde(default)]
    anchor: Option<DVec3>,
}

impl SubRegion {
    pub fn new(
        world: impl Into<String>,
        tile: TileCoord,
        category: impl Into<String>,
        boxes: Vec<CellBox>,
    ) -> Self {
        Self {
            world: world.into(),
            tile,
            category: category.into(),
            boxes,
            anchor: None,
        }
    }

    pub fn id(&self) -> String {
        sub_region_id(&self.world, self.tile, &self.category)
    }

    /// The previously resolved anchor, if any.
    pub fn anchor(&self) -> Option<DVec3> {
        self.anchor
    }

    fn largest_box(&self) -> CellBox {
        let mid = TILE_CELLS / 2;
        self.boxes
            .iter()
            .copied()
            .max_by_key(CellBox::area)
            .unwrap_or_else(|| CellBox::cell(mid, mid))
    }

    /// Find (and remember) a surface point inside this region.
    ///
    /// Tries the centre of the largest box first, then up to `max_cells`
    /// other covered cells in order of Manhattan distance from it. `None`
    /// is not remembered, so a later call tries again.
    pub fn resolve_anchor<P: SurfaceProbe + ?Sized>(
        &mut self,
        probe: &P,
        max_cells: usize,
    ) -> Option<DVec3> {
        if self.anchor.is_some() {
            return self.anchor;
        }

        let (lx, lz) = self.largest_box().center();
        let center = self.tile.to_global(lx, lz);

        if let Some(p) = probe.surface_at(&self.world, center.0, center.1) {
            self.anchor = Some(p);
            return self.anchor;
        }

        let mut candidates: Vec<(i32, i32)> = Vec::new();
        for b in &self.boxes {
            for z in b.min_z..=b.max_z {
                for x in b.min_x..=b.max_x {
                    candidates.push(self.tile.to_global(x, z));
                }
            }
        }
        candidates.sort_by_key(|&(x, z)| ((x - center.0).abs() + (z - center.1).abs(), x, z));
        candidates.dedup();

        let found = candidates
            .into_iter()
            .filter(|&c| c != center)
            .take(max_cells.max(1))
            .find_map(|(x, z)| probe.surface_at(&self.world, x, z));

        if found.is_none() {
            debug!(region = %self.id(), "no surface found for anchor");
        }
        self.anchor = found;
        found
    }

    /// [`resolve_anchor`](Self::resolve_anchor), with a miss reported as
    /// [`LatentError::RegionUnresolvable`].
    pub fn require_anchor<P: SurfaceProbe + ?Sized>(
        &mut self,
        probe: &P,
        max_cells: usize,
    ) -> Result<DVec3> {
        self.resolve_anchor(probe, max_cells)
            .ok_or_else(|| LatentError::RegionUnresolvable(self.id()))
    }

    /// Centre of the largest box at height `y`; usable even when no
    /// surface could be resolved.
    pub fn fallback_anchor(&self, y: f64) -> DVec3 {
        let (lx, lz) = self.largest_box().center();
        let (gx, gz) = self.tile.to_global(lx, lz);
        DVec3::new(
            gx as f64 * CELL_SIZE + CELL_SIZE / 2.0,
            y,
            gz as f64 * CELL_SIZE + CELL_SIZE / 2.0,
        )
    }
}

// =============================================================================
// RegionStore
// =============================================================================

/// Region registry paired with the latent index holding their embeddings.
#[derive(Debug)]
pub struct RegionStore {
    index: Arc<KnnIndex>,
    regions: RwLock<HashMap<String, SubRegion>>,
}

impl RegionStore {
    pub fn new(index: Arc<KnnIndex>) -> Self {
        Self {
            index,
            regions: RwLock::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<KnnIndex> {
        &self.index
    }

    /// Whether any sub-region of `tile` is registered.
    pub fn has_any_in_tile(&self, world: &str, tile: TileCoord) -> bool {
        let prefix = format!("{}|", tile_key(world, tile));
        self.regions.read().keys().any(|k| k.starts_with(&prefix))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.regions.read().contains_key(id)
    }

    /// Register `region` and upsert its embedding, unless its id is taken.
    ///
    /// The registry lock is held across the index upsert, so concurrent
    /// completions for the same id insert exactly once.
    pub fn put_if_absent(&self, region: SubRegion, embedding: Vector) -> bool {
        let id = region.id();
        let mut regions = self.regions.write();
        if regions.contains_key(&id) {
            return false;
        }
        self.index.upsert(id.clone(), embedding);
        regions.insert(id, region);
        true
    }

    pub fn region(&self, id: &str) -> Option<SubRegion> {
        self.regions.read().get(id).cloned()
    }

    /// Resolve and store the anchor of a registered region.
    pub fn resolve_anchor<P: SurfaceProbe + ?Sized>(
        &self,
        id: &str,
        probe: &P,
        max_cells: usize,
    ) -> Option<DVec3> {
        if let Some(anchor) = self.regions.read().get(id).and_then(SubRegion::anchor) {
            return Some(anchor);
        }
        self.regions
            .write()
            .get_mut(id)
            .and_then(|r| r.resolve_anchor(probe, max_cells))
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// Point-in-time snapshot of the index with the registry alongside.
    pub fn snapshot(&self) -> IndexSnapshot {
        let regions = self.regions.read();
        let mut snapshot = self.index.snapshot();
        snapshot.regions = regions
            .iter()
            .map(|(id, region)| (id.clone(), region.clone()))
            .collect();
        snapshot
    }

    /// Load a snapshot's entries and regions, replacing any with the same
    /// key. Returns the number of regions restored.
    ///
    /// Every region must be stored under its own id and have an embedding;
    /// otherwise nothing is loaded.
    pub fn restore(&self, snapshot: &IndexSnapshot) -> Result<usize> {
        for (id, region) in &snapshot.regions {
            if region.id() != *id {
                return Err(LatentError::Snapshot(format!(
                    "region stored as {:?} has id {:?}",
                    id,
                    region.id()
                )));
            }
            if !snapshot.entries.contains_key(id) {
                return Err(LatentError::Snapshot(format!(
                    "region {:?} has no embedding",
                    id
                )));
            }
        }

        let mut regions = self.regions.write();
        let entries = self.index.load_snapshot(snapshot)?;
        for (id, region) in &snapshot.regions {
            regions.insert(id.clone(), region.clone());
        }
        info!(entries, regions = snapshot.regions.len(), "region store restored");
        Ok(snapshot.regions.len())
    }

    /// A store over a fresh index rebuilt from `snapshot`.
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Result<Self> {
        let store = Self::new(Arc::new(KnnIndex::new()));
        store.restore(snapshot)?;
        Ok(store)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
