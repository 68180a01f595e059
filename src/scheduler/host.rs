//! What the seeder needs from the host world.

use crate::region::{CellBox, SurfaceProbe, TileCoord};
use serde::{Deserialize, Serialize};

/// A viewer's current cell in one world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerLocation {
    pub viewer: String,
    pub cell_x: i32,
    pub cell_z: i32,
}

impl ViewerLocation {
    pub fn new(viewer: impl Into<String>, cell_x: i32, cell_z: i32) -> Self {
        Self {
            viewer: viewer.into(),
            cell_x,
            cell_z,
        }
    }

    pub fn tile(&self) -> TileCoord {
        TileCoord::containing(self.cell_x, self.cell_z)
    }
}

/// Host spatial queries and load signals.
///
/// Called from the tick thread only.
pub trait HostWorld: SurfaceProbe {
    /// Worlds that may contain viewers.
    fn worlds(&self) -> Vec<String>;

    fn viewers(&self, world: &str) -> Vec<ViewerLocation>;

    /// Split a tile into `(category, bounds)` sub-regions. Empty when the
    /// tile cannot be classified yet.
    fn classify_tile(&self, world: &str, tile: TileCoord) -> Vec<(String, CellBox)>;

    /// Worst-case fraction (0..1) of host cells around viewers that are
    /// already loaded.
    fn resource_fill(&self) -> f64;

    /// Recent average tick duration.
    fn average_tick_ms(&self) -> f64;

    /// Tick duration budget.
    fn target_tick_ms(&self) -> f64;

    /// Whether a local consumer (renderer) shares the machine.
    fn is_local_host(&self) -> bool;
}

/// One reading of the host's load signals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostLoad {
    pub average_tick_ms: f64,
    pub target_tick_ms: f64,
    pub resource_fill: f64,
    pub local_host: bool,
}

impl HostLoad {
    pub fn sample<H: HostWorld + ?Sized>(host: &H) -> Self {
        Self {
            average_tick_ms: host.average_tick_ms(),
            target_tick_ms: host.target_tick_ms(),
            resource_fill: host.resource_fill(),
            local_host: host.is_local_host(),
        }
    }

    /// Average over target; above 1 means ticks run long.
    pub fn latency_ratio(&self) -> f64 {
        if self.target_tick_ms <= 0.0 {
            return 0.0;
        }
        self.average_tick_ms / self.target_tick_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_tile() {
        assert_eq!(ViewerLocation::new("a", 70, -5).tile(), TileCoord::new(2, -1));
    }

    #[test]
    fn test_latency_ratio() {
        let load = HostLoad {
            average_tick_ms: 75.0,
            target_tick_ms: 50.0,
            resource_fill: 1.0,
            local_host: false,
        };
        assert_eq!(load.latency_ratio(), 1.5);
        let idle = HostLoad {
            target_tick_ms: 0.0,
            ..load
        };
        assert_eq!(idle.latency_ratio(), 0.0);
    }
}
