//! Engine configuration.
//!
//! Every section deserializes with per-field defaults, so a TOML file only
//! needs to name the values it overrides:
//!
//! ```toml
//! [scheduler]
//! max_regions_per_tick = 32
//!
//! [cache]
//! workers = 4
//! ```

use crate::error::{LatentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// TOP LEVEL
// ============================================================================

/// All engine settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LatentConfig {
    #[serde(default)]
    pub integrator: IntegratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

impl LatentConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LatentConfig =
            toml::from_str(s).map_err(|e| LatentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.integrator.validate()?;
        self.cache.validate()?;
        self.scheduler.validate()?;
        self.index.validate()
    }
}

// ============================================================================
// INTEGRATOR
// ============================================================================

fn default_eta() -> f64 {
    0.05
}

/// Basis integration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    /// Convergence rate per world unit moved. Must match between every
    /// party evolving the same basis.
    #[serde(default = "default_eta")]
    pub eta: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self { eta: default_eta() }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.eta.is_finite() || self.eta < 0.0 {
            return Err(LatentError::Config(format!(
                "eta must be finite and >= 0, got {}",
                self.eta
            )));
        }
        Ok(())
    }
}

// ============================================================================
// EMBEDDING CACHE
// ============================================================================

fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 3).max(2)
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_prewarm() -> bool {
    true
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

/// Embedding worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of worker threads, each owning one backend instance.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue length; submissions beyond it are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Create every worker's backend before reporting ready.
    #[serde(default = "default_prewarm")]
    pub prewarm: bool,

    /// Grace period for draining on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            prewarm: default_prewarm(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LatentError::Config("workers must be > 0".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(LatentError::Config("queue_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

fn default_radius_tiles() -> i32 {
    4
}
fn default_max_queue() -> usize {
    20_000
}
fn default_initial_regions_per_tick() -> usize {
    6
}
fn default_min_regions_per_tick() -> usize {
    2
}
fn default_max_regions_per_tick() -> usize {
    64
}
fn default_increase_factor() -> f64 {
    1.5
}
fn default_decrease_factor() -> f64 {
    0.85
}
fn default_lag_threshold() -> f64 {
    1.8
}
fn default_fill_target() -> f64 {
    0.95
}
fn default_fill_min() -> f64 {
    0.85
}
fn default_local_host_factor() -> f64 {
    0.75
}
fn default_adjust_every_ticks() -> u64 {
    40
}
fn default_jitter_magnitude() -> f32 {
    1e-4
}

/// Horizon seeder and throughput controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tiles scanned in each direction around a viewer.
    #[serde(default = "default_radius_tiles")]
    pub radius_tiles: i32,

    /// Pending work cap; further discoveries are dropped until a later tick.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,

    #[serde(default = "default_initial_regions_per_tick")]
    pub initial_regions_per_tick: usize,

    #[serde(default = "default_min_regions_per_tick")]
    pub min_regions_per_tick: usize,

    #[serde(default = "default_max_regions_per_tick")]
    pub max_regions_per_tick: usize,

    /// Multiplier applied when below target (> 1).
    #[serde(default = "default_increase_factor")]
    pub increase_factor: f64,

    /// Multiplier applied when above target (< 1).
    #[serde(default = "default_decrease_factor")]
    pub decrease_factor: f64,

    /// Tick-time / target ratio at which latency headroom reaches zero.
    #[serde(default = "default_lag_threshold")]
    pub lag_threshold: f64,

    /// Resource fill at or above which fill headroom is 1.
    #[serde(default = "default_fill_target")]
    pub fill_target: f64,

    /// Resource fill at or below which fill headroom is 0.
    #[serde(default = "default_fill_min")]
    pub fill_min: f64,

    /// Headroom multiplier when sharing the host with a local consumer.
    #[serde(default = "default_local_host_factor")]
    pub local_host_factor: f64,

    /// Retune throughput every this many ticks.
    #[serde(default = "default_adjust_every_ticks")]
    pub adjust_every_ticks: u64,

    /// Scale of the deterministic per-region perturbation.
    #[serde(default = "default_jitter_magnitude")]
    pub jitter_magnitude: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            radius_tiles: default_radius_tiles(),
            max_queue: default_max_queue(),
            initial_regions_per_tick: default_initial_regions_per_tick(),
            min_regions_per_tick: default_min_regions_per_tick(),
            max_regions_per_tick: default_max_regions_per_tick(),
            increase_factor: default_increase_factor(),
            decrease_factor: default_decrease_factor(),
            lag_threshold: default_lag_threshold(),
            fill_target: default_fill_target(),
            fill_min: default_fill_min(),
            local_host_factor: default_local_host_factor(),
            adjust_every_ticks: default_adjust_every_ticks(),
            jitter_magnitude: default_jitter_magnitude(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.radius_tiles < 0 {
            return Err(LatentError::Config("radius_tiles must be >= 0".to_string()));
        }
        if self.min_regions_per_tick == 0 {
            return Err(LatentError::Config(
                "min_regions_per_tick must be > 0".to_string(),
            ));
        }
        if self.min_regions_per_tick > self.max_regions_per_tick {
            return Err(LatentError::Config(format!(
                "min_regions_per_tick ({}) cannot exceed max_regions_per_tick ({})",
                self.min_regions_per_tick, self.max_regions_per_tick
            )));
        }
        if self.increase_factor <= 1.0 {
            return Err(LatentError::Config("increase_factor must be > 1".to_string()));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(LatentError::Config(
                "decrease_factor must be in (0, 1)".to_string(),
            ));
        }
        if self.lag_threshold <= 1.0 {
            return Err(LatentError::Config("lag_threshold must be > 1".to_string()));
        }
        if self.fill_min >= self.fill_target {
            return Err(LatentError::Config(format!(
                "fill_min ({}) must be below fill_target ({})",
                self.fill_min, self.fill_target
            )));
        }
        if self.adjust_every_ticks == 0 {
            return Err(LatentError::Config(
                "adjust_every_ticks must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// INDEX
// ============================================================================

fn default_write_warn_ms() -> u64 {
    2000
}

/// kNN index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Write-lock wait after which an upsert logs a warning and blocks.
    #[serde(default = "default_write_warn_ms")]
    pub write_warn_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            write_warn_ms: default_write_warn_ms(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
