//! Similarity metrics for latent vector comparison.
//!
//! Every metric is oriented so that a larger score means "closer". Euclidean
//! is reported as the *negated* squared distance, which keeps top-k selection
//! uniform across metrics.
//!
//! When compiled with the `simd` feature, the dot product uses a
//! SIMD-accelerated kernel.

use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Available similarity metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity (scale-invariant)
    #[default]
    Cosine,
    /// Raw inner product
    Dot,
    /// Negated squared Euclidean distance
    Euclidean,
}

impl Metric {
    /// Returns all metrics.
    pub fn all() -> &'static [Metric] {
        &[Metric::Cosine, Metric::Dot, Metric::Euclidean]
    }
}

/// Similarity computation for latent vectors.
pub struct Similarity;

impl Similarity {
    /// Compute the score of `a` against `b` under `metric`.
    ///
    /// Larger is always closer.
    pub fn score(a: &Vector, b: &Vector, metric: Metric) -> f32 {
        match metric {
            Metric::Cosine => Self::cosine(a, b),
            Metric::Dot => Self::dot(a, b),
            Metric::Euclidean => -Self::squared_euclidean(a, b),
        }
    }

    /// Cosine similarity over the cached unit forms.
    ///
    /// Returns a value in [-1, 1]; near-zero inputs contribute 0.
    pub fn cosine(a: &Vector, b: &Vector) -> f32 {
        dot_kernel(a.unit(), b.unit())
    }

    /// Raw dot product.
    pub fn dot(a: &Vector, b: &Vector) -> f32 {
        dot_kernel(a.data(), b.data())
    }

    /// Squared Euclidean distance.
    pub fn squared_euclidean(a: &Vector, b: &Vector) -> f32 {
        a.data()
            .iter()
            .zip(b.data().iter())
            .map(|(&x, &y)| {
                let d = (x - y) as f64;
                d * d
            })
            .sum::<f64>() as f32
    }

    /// Euclidean distance.
    pub fn euclidean_distance(a: &Vector, b: &Vector) -> f32 {
        Self::squared_euclidean(a, b).sqrt()
    }
}

#[cfg(feature = "simd")]
fn dot_kernel(a: &[f32], b: &[f32]) -> f32 {
    use simsimd::SpatialSimilarity;
    f32::dot(a, b).unwrap_or(0.0) as f32
}

#[cfg(not(feature = "simd"))]
fn dot_kernel(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum::<f64>() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_from(head: &[f32]) -> Vector {
        let mut v = Vector::zeros();
        for (i, &x) in head.iter().enumerate() {
            v.set(i, x);
        }
        v
    }

    #[test]
    fn test_cosine_identical() {
        let a = vec_from(&[1.0, -2.0, 3.0]);
        assert!((Similarity::cosine(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec_from(&[1.0, -2.0, 3.0]);
        let b = vec_from(&[-1.0, 2.0, -3.0]);
        assert!((Similarity::cosine(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_scale_invariant() {
        let a = vec_from(&[1.0, 2.0]);
        let b = vec_from(&[10.0, 20.0]);
        assert!((Similarity::cosine(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot() {
        let a = vec_from(&[1.0, 2.0, 3.0]);
        let b = vec_from(&[4.0, -5.0, 6.0]);
        assert!((Similarity::dot(&a, &b) - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_is_negated_squared_distance() {
        let a = vec_from(&[1.0, 1.0]);
        let b = vec_from(&[4.0, 5.0]);
        let score = Similarity::score(&a, &b, Metric::Euclidean);
        assert!((score + 25.0).abs() < 1e-5);
        assert!((Similarity::euclidean_distance(&a, &b) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_euclidean_larger_is_closer() {
        let q = vec_from(&[0.0, 0.0]);
        let near = vec_from(&[1.0, 0.0]);
        let far = vec_from(&[9.0, 0.0]);
        assert!(
            Similarity::score(&near, &q, Metric::Euclidean)
                > Similarity::score(&far, &q, Metric::Euclidean)
        );
    }

    #[test]
    fn test_score_dispatches() {
        let a = vec_from(&[1.0, -1.0, 2.0]);
        let b = vec_from(&[0.5, 3.0, -1.0]);
        assert_eq!(Similarity::score(&a, &b, Metric::Dot), Similarity::dot(&a, &b));
        assert_eq!(
            Similarity::score(&a, &b, Metric::Cosine),
            Similarity::cosine(&a, &b)
        );
    }
}
