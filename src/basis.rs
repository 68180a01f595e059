//! Three-axis frame inside latent space.
//!
//! A [`Basis`] holds the `i`, `j`, `k` axes a viewer uses to project latent
//! displacement into 3D. The axes are kept near-orthonormal by
//! [`BasisIntegrator`](crate::integrator::BasisIntegrator); nothing else
//! enforces it. A fresh basis is three zero vectors and must be aligned
//! before use.

use crate::error::{LatentError, Result};
use crate::seeded::SeededVectors;
use crate::vector::{Vector, LATENT_DIM, NORM_EPSILON};
use serde::{Deserialize, Serialize};

/// Three latent axes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Basis {
    pub i: Vector,
    pub j: Vector,
    pub k: Vector,
}

impl Basis {
    pub fn new(i: Vector, j: Vector, k: Vector) -> Self {
        Self { i, j, k }
    }

    /// Whether all three axes have been given a direction.
    pub fn is_set(&self) -> bool {
        !self.i.is_near_zero() && !self.j.is_near_zero() && !self.k.is_near_zero()
    }

    /// `dx·i + dy·j + dz·k`
    pub fn combine(&self, dx: f32, dy: f32, dz: f32) -> Vector {
        let mut out = Vector::zeros();
        out.add_scaled(&self.i, dx)
            .add_scaled(&self.j, dy)
            .add_scaled(&self.k, dz);
        out
    }

    pub fn axes(&self) -> [&Vector; 3] {
        [&self.i, &self.j, &self.k]
    }

    pub fn axes_mut(&mut self) -> [&mut Vector; 3] {
        [&mut self.i, &mut self.j, &mut self.k]
    }

    /// Largest deviation from orthonormality across lengths and pairwise dots.
    pub fn orthonormality_error(&self) -> f32 {
        let lengths = [
            (self.i.length() - 1.0).abs(),
            (self.j.length() - 1.0).abs(),
            (self.k.length() - 1.0).abs(),
        ];
        let dots = [
            self.i.dot(&self.j).abs(),
            self.i.dot(&self.k).abs(),
            self.j.dot(&self.k).abs(),
        ];
        lengths.iter().chain(dots.iter()).fold(0.0f32, |m, &x| m.max(x))
    }

    /// Build an orthonormal frame whose `i` axis points along `reference`.
    ///
    /// `j` is Gram–Schmidt'd from the attunement (or the first canonical axis
    /// when the attunement is degenerate). `k` is orthogonalized from the
    /// second canonical axis, falling back to a seed hashed from `reference`.
    /// This is a one-shot administrative overwrite, not an incremental step.
    pub fn aligned_to(reference: &Vector, attunement: Option<&Vector>) -> Basis {
        let i = reference.normalized();

        let seed = match attunement {
            Some(a) if !a.is_near_zero() => a.clone(),
            _ => Vector::unit_axis(0),
        };
        let mut j = reject(&seed, &[&i]);
        if j.is_near_zero() {
            j = reject(&Vector::unit_axis(0), &[&i]);
        }
        if j.is_near_zero() {
            j = reject(&Vector::unit_axis(1), &[&i]);
        }
        j.normalize();

        let mut k = reject(&Vector::unit_axis(1), &[&i, &j]);
        if k.is_near_zero() {
            let hashed = SeededVectors::new().noise_for_vector(reference);
            k = reject(&hashed, &[&i, &j]);
        }
        k.normalize();

        Basis { i, j, k }
    }

    /// Flatten to 1152 IEEE-754 bit patterns (`i ‖ j ‖ k`).
    pub fn to_bits(&self) -> Vec<u32> {
        let mut bits = Vec::with_capacity(LATENT_DIM * 3);
        bits.extend(self.i.to_bits());
        bits.extend(self.j.to_bits());
        bits.extend(self.k.to_bits());
        bits
    }

    /// Rebuild from 1152 bit patterns.
    pub fn from_bits(bits: &[u32]) -> Result<Basis> {
        if bits.len() != LATENT_DIM * 3 {
            return Err(LatentError::DimensionMismatch {
                expected: LATENT_DIM * 3,
                got: bits.len(),
            });
        }
        Ok(Basis {
            i: Vector::from_bits(&bits[..LATENT_DIM])?,
            j: Vector::from_bits(&bits[LATENT_DIM..LATENT_DIM * 2])?,
            k: Vector::from_bits(&bits[LATENT_DIM * 2..])?,
        })
    }
}

/// `v` minus its projections onto each (unit) axis.
fn reject(v: &Vector, axes: &[&Vector]) -> Vector {
    let mut out = v.clone();
    for axis in axes {
        if axis.length() < NORM_EPSILON {
            continue;
        }
        let along = out.dot(axis);
        out.add_scaled(axis, -along);
    }
    out
}
