//! Latent Walk
//!
//! A viewer walks east across a synthetic world. The seeder fills tiles
//! ahead of them with region embeddings, the walk rotates their basis, and
//! each step prints which regions come into and out of view together with
//! where they land in 3D.
//!
//! Run: cargo run --example latent_walk
//! Verbose: RUST_LOG=latent_horizon=debug cargo run --example latent_walk

use glam::DVec3;
use latent_horizon::{
    CellBox, HashedBackend, HostWorld, LatentConfig, LatentHorizon, Metric, SeededVectors,
    SurfaceProbe, TileCoord, ViewerLocation, VisibilityTracker,
};
use std::cell::Cell;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BIOMES: [&str; 5] = ["forest", "desert", "tundra", "swamp", "mesa"];

/// Rolling hills with biome bands every few tiles.
struct SyntheticWorld {
    viewer_x: Cell<i32>,
    tick_ms: Cell<f64>,
}

impl SurfaceProbe for SyntheticWorld {
    fn surface_at(&self, _world: &str, x: i32, z: i32) -> Option<DVec3> {
        let height = 64.0 + 6.0 * ((x as f64) * 0.05).sin() + 3.0 * ((z as f64) * 0.08).cos();
        Some(DVec3::new(x as f64, height.round(), z as f64))
    }
}

impl HostWorld for SyntheticWorld {
    fn worlds(&self) -> Vec<String> {
        vec!["overworld".to_string()]
    }

    fn viewers(&self, _world: &str) -> Vec<ViewerLocation> {
        vec![ViewerLocation::new("walker", self.viewer_x.get(), 0)]
    }

    fn classify_tile(&self, _world: &str, tile: TileCoord) -> Vec<(String, CellBox)> {
        let band = tile.x.div_euclid(3).rem_euclid(BIOMES.len() as i32) as usize;
        vec![
            (BIOMES[band].to_string(), CellBox::new(0, 0, 31, 23)),
            ("river".to_string(), CellBox::new(0, 24, 31, 31)),
        ]
    }

    fn resource_fill(&self) -> f64 {
        0.97
    }

    fn average_tick_ms(&self) -> f64 {
        self.tick_ms.get()
    }

    fn target_tick_ms(&self) -> f64 {
        50.0
    }

    fn is_local_host(&self) -> bool {
        false
    }
}

fn main() -> latent_horizon::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("{}", "=".repeat(70));
    println!("LATENT WALK");
    println!("{}", "=".repeat(70));

    let config = LatentConfig::from_toml_str(
        r#"
        [cache]
        workers = 2

        [scheduler]
        radius_tiles = 2
        adjust_every_ticks = 4
        "#,
    )?;
    let engine = LatentHorizon::new(config, HashedBackend::factory(SeededVectors::new()))?;
    engine.start()?;

    let world = SyntheticWorld {
        viewer_x: Cell::new(0),
        tick_ms: Cell::new(30.0),
    };
    let mut seeder = engine.seeder();
    let mut tracker = VisibilityTracker::new();
    let mut movement = engine.movement_tracker::<String>();

    let walker = "walker".to_string();
    let attunement = engine.noise("wanderlust");
    let mut basis = engine.align_basis(&engine.noise("east"), Some(&attunement));
    let mut position = engine.noise("walker");

    for step in 0..40u64 {
        // the host slows down mid-walk; the seeder should back off
        world.tick_ms.set(if (15..25).contains(&step) { 85.0 } else { 30.0 });
        let x = world.viewer_x.get() + 8;
        world.viewer_x.set(x);

        let report = seeder.tick(&world, step);
        let cell = DVec3::new(x as f64 * 16.0, 64.0, 0.0);
        movement.observe(&walker, "overworld", cell, &mut basis, &attunement);

        // drift the latent position toward whatever is nearest
        if let Some((key, _)) = engine.index().knn(1, &position, Metric::Cosine).first() {
            if let Some(target) = engine.index().get(key) {
                position.converge_toward(&target, 0.05);
            }
        }

        let delta = tracker.update(&walker, engine.index(), &position, 6);
        if delta.is_empty() && report.registered == 0 {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        println!(
            "\nstep {:>2}  x={:<4} registered={:<2} queued={:<3} rate={}",
            step,
            x,
            report.registered,
            seeder.queue_len(),
            seeder.regions_per_tick()
        );
        for (key, v) in &delta.added {
            let anchor = engine
                .regions()
                .resolve_anchor(key, &world, 32)
                .unwrap_or(cell);
            let p = engine.project(v, &position, &basis, anchor, 2.0);
            println!("  + {:<36} at ({:>7.1}, {:>5.1}, {:>7.1})", key, p.x, p.y, p.z);
        }
        for key in &delta.removed {
            println!("  - {}", key);
        }
        thread::sleep(Duration::from_millis(5));
    }

    let status = seeder.status();
    println!("\n{}", "=".repeat(70));
    println!("regions indexed: {}", engine.index().size());
    println!("cache: {:?}", engine.cache().stats());
    println!(
        "seeder: {}",
        serde_json::to_string(&status).unwrap_or_default()
    );

    engine.shutdown();
    Ok(())
}
