//! Latent → 3D projection.
//!
//! 1. `Δ = object − viewer` (384-d)
//! 2. `(x, y, z) = (⟨Δ,i⟩, ⟨Δ,j⟩, ⟨Δ,k⟩) · scale`
//! 3. `world = anchor + (x, y, z)`
//!
//! No clamping or culling happens here; visibility filtering is the
//! caller's job.

use crate::basis::Basis;
use crate::vector::Vector;
use glam::DVec3;

/// Stateless projector from latent space into the 3D world.
pub struct Projector;

impl Projector {
    /// Project `object` relative to `viewer` through `basis`, anchored at `anchor`.
    pub fn project(
        object: &Vector,
        viewer: &Vector,
        basis: &Basis,
        anchor: DVec3,
        scale: f32,
    ) -> DVec3 {
        anchor + Self::offset(object, viewer, basis) * scale as f64
    }

    /// The unscaled 3D offset of `object` as seen from `viewer`.
    pub fn offset(object: &Vector, viewer: &Vector, basis: &Basis) -> DVec3 {
        let (mut x, mut y, mut z) = (0.0f64, 0.0f64, 0.0f64);
        let axes = (basis.i.data(), basis.j.data(), basis.k.data());
        for (n, (&o, &p)) in object.data().iter().zip(viewer.data()).enumerate() {
            let d = (o - p) as f64;
            x += d * axes.0[n] as f64;
            y += d * axes.1[n] as f64;
            z += d * axes.2[n] as f64;
        }
        DVec3::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded::SeededVectors;

    fn canonical() -> Basis {
        Basis::new(Vector::unit_axis(0), Vector::unit_axis(1), Vector::unit_axis(2))
    }

    #[test]
    fn test_project_canonical() {
        let mut object = Vector::zeros();
        object.set(0, 3.0);
        object.set(1, -2.0);
        object.set(2, 1.0);
        object.set(100, 50.0); // outside the frame, ignored
        let viewer = Vector::zeros();
        let p = Projector::project(&object, &viewer, &canonical(), DVec3::new(10.0, 64.0, 10.0), 2.0);
        assert!((p - DVec3::new(16.0, 60.0, 12.0)).length() < 1e-9);
    }

    #[test]
    fn test_same_position_lands_on_anchor() {
        let v = SeededVectors::new().noise("here");
        let basis = Basis::aligned_to(&SeededVectors::new().noise("frame"), None);
        let anchor = DVec3::new(1.0, 2.0, 3.0);
        let p = Projector::project(&v, &v, &basis, anchor, 40.0);
        assert!((p - anchor).length() < 1e-9);
    }

    #[test]
    fn test_offset_is_linear_in_scale() {
        let seeds = SeededVectors::new();
        let basis = Basis::aligned_to(&seeds.noise("frame"), None);
        let (o, v) = (seeds.noise("object"), seeds.noise("viewer"));
        let one = Projector::project(&o, &v, &basis, DVec3::ZERO, 1.0);
        let three = Projector::project(&o, &v, &basis, DVec3::ZERO, 3.0);
        assert!((one * 3.0 - three).length() < 1e-4);
    }
}
