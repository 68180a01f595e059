//! Incremental basis rotation driven by 3D movement.
//!
//! Each step takes the latent direction the viewer is currently travelling
//! (`dx·i + dy·j + dz·k`) and rotates the whole frame a little within the
//! plane spanned by that direction and the attunement target, so the travel
//! direction converges on the attunement as the viewer keeps moving.
//!
//! Rotation within a 2D plane is norm- and angle-preserving, so the frame
//! stays orthonormal; a cheap length check only guards float drift.
//!
//! # Example
//!
//! ```rust
//! use glam::DVec3;
//! use latent_horizon::{Basis, BasisIntegrator, SeededVectors};
//!
//! let seeds = SeededVectors::new();
//! let mut basis = Basis::aligned_to(&seeds.noise("origin"), None);
//! let attunement = seeds.noise("target");
//!
//! let integrator = BasisIntegrator::new(0.05);
//! let changed = integrator.step(&mut basis, &attunement, DVec3::new(1.0, 0.0, 0.0));
//! assert!(changed);
//! ```

use crate::basis::Basis;
use crate::config::IntegratorConfig;
use crate::vector::{Vector, NORM_EPSILON};
use glam::DVec3;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::trace;

/// Squared movement below which a step is idle.
const IDLE_DELTA_SQ: f64 = 1e-10;
/// `cos θ` above this means already aligned.
const ALIGNED_COS: f64 = 1.0 - 1e-8;
/// Rotation angles below this are skipped.
const MIN_ANGLE: f64 = 1e-9;
/// Axis length drift tolerated before renormalizing.
const RENORM_TOLERANCE: f32 = 1e-5;

/// Rotates a [`Basis`] toward an attunement direction.
///
/// `eta` must be identical wherever the same basis state is evolved
/// independently, or the copies drift apart.
#[derive(Clone, Copy, Debug)]
pub struct BasisIntegrator {
    eta: f64,
}

impl BasisIntegrator {
    pub fn new(eta: f64) -> Self {
        Self { eta }
    }

    pub fn from_config(config: &IntegratorConfig) -> Self {
        Self::new(config.eta)
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// One integration step. Returns `true` if the basis changed.
    ///
    /// No-ops (basis left bit-for-bit unchanged): idle movement, a
    /// degenerate travel direction, zero attunement, travel already aligned
    /// with the attunement, or a vanishing rotation angle.
    pub fn step(&self, basis: &mut Basis, attunement: &Vector, delta: DVec3) -> bool {
        let moved_sq = delta.length_squared();
        if moved_sq < IDLE_DELTA_SQ {
            return false;
        }

        let mut u = basis.combine(delta.x as f32, delta.y as f32, delta.z as f32);
        if u.length() < NORM_EPSILON {
            return false;
        }
        u.normalize();

        if attunement.is_near_zero() {
            return false;
        }
        let target = attunement.normalized();

        let cos_theta = (u.dot(&target) as f64).clamp(-1.0, 1.0);
        if cos_theta > ALIGNED_COS {
            return false;
        }

        // t: component of the target orthogonal to u
        let mut t = target.clone();
        t.add_scaled(&u, -(cos_theta as f32));
        if t.length() < NORM_EPSILON {
            return false;
        }
        t.normalize();

        let theta = cos_theta.acos();
        let fraction = (self.eta * moved_sq.sqrt()).clamp(0.0, 1.0);
        let alpha = theta * fraction;
        if alpha < MIN_ANGLE {
            return false;
        }

        let (sin_a, cos_a) = alpha.sin_cos();
        for axis in basis.axes_mut() {
            rotate_in_plane(axis, &u, &t, cos_a, sin_a);
            let len = axis.length();
            if (len - 1.0).abs() > RENORM_TOLERANCE && len >= NORM_EPSILON {
                axis.scale(1.0 / len);
            }
        }

        trace!(alpha, theta, "basis rotated");
        true
    }
}

impl Default for BasisIntegrator {
    fn default() -> Self {
        Self::from_config(&IntegratorConfig::default())
    }
}

/// Rotate `v` by the angle (`cos_a`, `sin_a`) inside the plane of the
/// orthonormal pair (`u`, `t`); the residual outside the plane is untouched.
fn rotate_in_plane(v: &mut Vector, u: &Vector, t: &Vector, cos_a: f64, sin_a: f64) {
    let a = v.dot(u) as f64;
    let b = v.dot(t) as f64;
    let a_rot = a * cos_a - b * sin_a;
    let b_rot = a * sin_a + b * cos_a;
    v.add_scaled(u, (a_rot - a) as f32)
        .add_scaled(t, (b_rot - b) as f32);
}

// =============================================================================
// MovementTracker
// =============================================================================

#[derive(Clone, Debug)]
struct LastSeen {
    world: String,
    position: DVec3,
}

/// Turns a per-tick position feed into integrator steps.
///
/// Remembers each actor's previous position; a world change or
/// [`forget`](MovementTracker::forget) resets tracking for that actor.
#[derive(Debug)]
pub struct MovementTracker<A> {
    integrator: BasisIntegrator,
    last: HashMap<A, LastSeen>,
}

impl<A: Hash + Eq + Clone> MovementTracker<A> {
    pub fn new(integrator: BasisIntegrator) -> Self {
        Self {
            integrator,
            last: HashMap::new(),
        }
    }

    /// Record a position and evolve the actor's basis by the movement since
    /// the previous observation. Returns `true` if the basis changed.
    pub fn observe(
        &mut self,
        actor: &A,
        world: &str,
        position: DVec3,
        basis: &mut Basis,
        attunement: &Vector,
    ) -> bool {
        let previous = self.last.insert(
            actor.clone(),
            LastSeen {
                world: world.to_string(),
                position,
            },
        );

        let Some(previous) = previous else {
            return false;
        };
        if previous.world != world || !basis.is_set() {
            return false;
        }

        self.integrator
            .step(basis, attunement, position - previous.position)
    }

    /// Stop tracking an actor (removed or left the world).
    pub fn forget(&mut self, actor: &A) {
        self.last.remove(actor);
    }

    /// Number of actors with a remembered position.
    pub fn tracked(&self) -> usize {
        self.last.len()
    }

    pub fn integrator(&self) -> &BasisIntegrator {
        &self.integrator
    }
}
