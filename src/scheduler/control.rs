//! AIMD throughput control from two headroom signals.
//!
//! Headroom is a 0..1 measure of spare capacity. The combined headroom
//! (the smaller of latency and fill) picks a target between the configured
//! minimum and maximum regions per tick; the current rate then moves toward
//! it by a multiplicative step up or down.

use super::host::HostLoad;
use crate::config::SchedulerConfig;
use tracing::debug;

/// 1 at or under the tick budget, falling linearly to 0 at `lag_threshold`.
pub fn latency_headroom(ratio: f64, lag_threshold: f64) -> f64 {
    if ratio <= 1.0 {
        return 1.0;
    }
    if ratio >= lag_threshold {
        return 0.0;
    }
    ((lag_threshold - ratio) / (lag_threshold - 1.0)).clamp(0.0, 1.0)
}

/// 1 at or above `fill_target`, 0 at or below `fill_min`, linear between.
pub fn fill_headroom(fill: f64, fill_min: f64, fill_target: f64) -> f64 {
    if fill >= fill_target {
        return 1.0;
    }
    if fill <= fill_min {
        return 0.0;
    }
    (fill - fill_min) / (fill_target - fill_min)
}

/// Owns the regions-per-tick rate.
#[derive(Clone, Debug)]
pub struct ThroughputController {
    min: usize,
    max: usize,
    increase_factor: f64,
    decrease_factor: f64,
    lag_threshold: f64,
    fill_min: f64,
    fill_target: f64,
    local_host_factor: f64,

    regions_per_tick: usize,
    latency_ratio: f64,
    last_fill: f64,
    last_headroom: f64,
}

impl ThroughputController {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            min: config.min_regions_per_tick,
            max: config.max_regions_per_tick,
            increase_factor: config.increase_factor,
            decrease_factor: config.decrease_factor,
            lag_threshold: config.lag_threshold,
            fill_min: config.fill_min,
            fill_target: config.fill_target,
            local_host_factor: config.local_host_factor,
            regions_per_tick: config
                .initial_regions_per_tick
                .clamp(config.min_regions_per_tick, config.max_regions_per_tick),
            latency_ratio: 0.0,
            last_fill: 1.0,
            last_headroom: 1.0,
        }
    }

    pub fn regions_per_tick(&self) -> usize {
        self.regions_per_tick
    }

    /// Latency ratio seen at the last adjustment.
    pub fn latency_ratio(&self) -> f64 {
        self.latency_ratio
    }

    /// Resource fill seen at the last adjustment.
    pub fn last_fill(&self) -> f64 {
        self.last_fill
    }

    pub fn last_headroom(&self) -> f64 {
        self.last_headroom
    }

    /// Combined 0..1 headroom for a load reading.
    pub fn headroom(&self, load: &HostLoad) -> f64 {
        let latency = latency_headroom(load.latency_ratio(), self.lag_threshold);
        let fill = fill_headroom(load.resource_fill, self.fill_min, self.fill_target);
        let head = latency.min(fill);
        if load.local_host {
            head * self.local_host_factor
        } else {
            head
        }
    }

    /// Throughput the controller steers toward at `headroom`.
    pub fn target_for(&self, headroom: f64) -> usize {
        let (min, max) = (self.min as f64, self.max as f64);
        (min + (max - min) * headroom.clamp(0.0, 1.0)).round() as usize
    }

    /// Take one AIMD step toward the target for `load`. Returns the new rate.
    pub fn adjust(&mut self, load: &HostLoad) -> usize {
        self.latency_ratio = load.latency_ratio();
        self.last_fill = load.resource_fill;
        self.last_headroom = self.headroom(load);

        let target = self.target_for(self.last_headroom);
        self.step_toward(target);

        debug!(
            headroom = self.last_headroom,
            latency_ratio = self.latency_ratio,
            fill = self.last_fill,
            target,
            regions_per_tick = self.regions_per_tick,
            "throughput adjusted"
        );
        self.regions_per_tick
    }

    fn step_toward(&mut self, target: usize) {
        let current = self.regions_per_tick;
        self.regions_per_tick = if current < target {
            let raised = (current as f64 * self.increase_factor).ceil() as usize;
            raised.max(self.min).min(self.max)
        } else if current > target {
            let lowered = (current as f64 * self.decrease_factor).floor() as usize;
            lowered.max(self.min)
        } else {
            current
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(ratio: f64, fill: f64) -> HostLoad {
        HostLoad {
            average_tick_ms: 50.0 * ratio,
            target_tick_ms: 50.0,
            resource_fill: fill,
            local_host: false,
        }
    }

    #[test]
    fn test_latency_headroom_shape() {
        assert_eq!(latency_headroom(0.3, 1.8), 1.0);
        assert_eq!(latency_headroom(1.0, 1.8), 1.0);
        assert!((latency_headroom(1.4, 1.8) - 0.5).abs() < 1e-12);
        assert_eq!(latency_headroom(1.8, 1.8), 0.0);
        assert_eq!(latency_headroom(4.0, 1.8), 0.0);
    }

    #[test]
    fn test_fill_headroom_shape() {
        assert_eq!(fill_headroom(1.0, 0.85, 0.95), 1.0);
        assert_eq!(fill_headroom(0.95, 0.85, 0.95), 1.0);
        assert!((fill_headroom(0.90, 0.85, 0.95) - 0.5).abs() < 1e-9);
        assert_eq!(fill_headroom(0.85, 0.85, 0.95), 0.0);
        assert_eq!(fill_headroom(0.2, 0.85, 0.95), 0.0);
    }

    #[test]
    fn test_headroom_takes_bottleneck_and_local_cushion() {
        let c = ThroughputController::new(&SchedulerConfig::default());
        assert!((c.headroom(&load(1.4, 1.0)) - 0.5).abs() < 1e-9);
        assert!((c.headroom(&load(0.5, 0.90)) - 0.5).abs() < 1e-9);
        let local = HostLoad {
            local_host: true,
            ..load(0.5, 1.0)
        };
        assert!((c.headroom(&local) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_rises_to_max_under_full_headroom() {
        let config = SchedulerConfig::default();
        let mut c = ThroughputController::new(&config);
        for _ in 0..50 {
            let rate = c.adjust(&load(0.5, 1.0));
            assert!(rate >= config.min_regions_per_tick && rate <= config.max_regions_per_tick);
        }
        assert_eq!(c.regions_per_tick(), config.max_regions_per_tick);
    }

    #[test]
    fn test_falls_to_min_under_zero_headroom() {
        let config = SchedulerConfig {
            initial_regions_per_tick: 64,
            ..SchedulerConfig::default()
        };
        let mut c = ThroughputController::new(&config);
        for _ in 0..50 {
            let rate = c.adjust(&load(3.0, 0.1));
            assert!(rate >= config.min_regions_per_tick && rate <= config.max_regions_per_tick);
        }
        assert_eq!(c.regions_per_tick(), config.min_regions_per_tick);
        assert_eq!(c.latency_ratio(), 3.0);
        assert_eq!(c.last_fill(), 0.1);
    }

    #[test]
    fn test_asymmetric_steps() {
        let mut c = ThroughputController::new(&SchedulerConfig::default());
        assert_eq!(c.regions_per_tick(), 6);
        assert_eq!(c.adjust(&load(0.5, 1.0)), 9, "ceil(6 * 1.5)");
        assert_eq!(c.adjust(&load(3.0, 1.0)), 7, "floor(9 * 0.85)");
    }

    #[test]
    fn test_holds_at_target() {
        let mut c = ThroughputController::new(&SchedulerConfig::default());
        // headroom 0 → target = min = 2; from 2 nothing moves
        for _ in 0..20 {
            c.adjust(&load(5.0, 1.0));
        }
        assert_eq!(c.adjust(&load(5.0, 1.0)), 2);
    }
}
