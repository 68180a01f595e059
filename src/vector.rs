//! Latent vector type.
//!
//! Every latent position is a fixed-width 384-dimensional `f32` vector. The
//! unit-normalized form is computed lazily and cached; any mutating method
//! drops the cache, so a stale normalization can never be observed.

use crate::error::{LatentError, Result};
use crate::similarity::Similarity;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Index;
use std::sync::OnceLock;

/// Dimensionality of every latent vector.
pub const LATENT_DIM: usize = 384;

/// Lengths below this are treated as the zero vector when normalizing.
pub const NORM_EPSILON: f32 = 1e-6;

/// A 384-dimensional latent vector.
///
/// Mutation happens in place (`add`, `sub`, `scale`, `converge_toward`);
/// cloning yields a fully independent deep copy, including the cached
/// normalized form.
#[derive(Clone, Debug)]
pub struct Vector {
    /// The raw components
    data: Box<[f32; LATENT_DIM]>,
    /// Unit-normalized components; empty means dirty
    normalized: OnceLock<Box<[f32; LATENT_DIM]>>,
}

impl Vector {
    /// Create the zero vector.
    pub fn zeros() -> Self {
        Self::from_array([0.0; LATENT_DIM])
    }

    /// Create a vector from an owned array.
    pub fn from_array(data: [f32; LATENT_DIM]) -> Self {
        Self {
            data: Box::new(data),
            normalized: OnceLock::new(),
        }
    }

    /// Create a vector from raw values.
    ///
    /// # Errors
    /// `DimensionMismatch` unless `values.len() == 384`.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        if values.len() != LATENT_DIM {
            return Err(LatentError::DimensionMismatch {
                expected: LATENT_DIM,
                got: values.len(),
            });
        }
        let mut data = Box::new([0.0; LATENT_DIM]);
        data.copy_from_slice(values);
        Ok(Self {
            data,
            normalized: OnceLock::new(),
        })
    }

    /// The unit vector along a single axis.
    ///
    /// # Panics
    /// If `axis >= 384`.
    pub fn unit_axis(axis: usize) -> Self {
        let mut data = [0.0; LATENT_DIM];
        data[axis] = 1.0;
        Self::from_array(data)
    }

    /// Get the dimensionality (always 384).
    pub fn dimensions(&self) -> usize {
        LATENT_DIM
    }

    /// Get the raw data as a slice.
    pub fn data(&self) -> &[f32] {
        &self.data[..]
    }

    /// Copy the raw data out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    /// Overwrite a single component.
    pub fn set(&mut self, index: usize, value: f32) {
        self.data[index] = value;
        self.invalidate();
    }

    /// Whether the normalized cache needs recomputation.
    pub(crate) fn is_dirty(&self) -> bool {
        self.normalized.get().is_none()
    }

    fn invalidate(&mut self) {
        self.normalized.take();
    }

    // =========================================================================
    // In-place algebra
    // =========================================================================

    /// `self += other`
    pub fn add(&mut self, other: &Vector) -> &mut Self {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        self.invalidate();
        self
    }

    /// `self -= other`
    pub fn sub(&mut self, other: &Vector) -> &mut Self {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a -= b;
        }
        self.invalidate();
        self
    }

    /// `self *= factor`
    pub fn scale(&mut self, factor: f32) -> &mut Self {
        for a in self.data.iter_mut() {
            *a *= factor;
        }
        self.invalidate();
        self
    }

    /// `self += other * factor`
    pub fn add_scaled(&mut self, other: &Vector, factor: f32) -> &mut Self {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b * factor;
        }
        self.invalidate();
        self
    }

    /// Move each component a fraction `factor` of the way toward `target`.
    ///
    /// `factor = 0` leaves the vector untouched, `factor = 1` snaps onto the
    /// target. Values outside `[0, 1]` extrapolate and are not clamped.
    pub fn converge_toward(&mut self, target: &Vector, factor: f32) -> &mut Self {
        for (a, t) in self.data.iter_mut().zip(target.data.iter()) {
            *a += (t - *a) * factor;
        }
        self.invalidate();
        self
    }

    /// Scale to unit length in place. Near-zero vectors become zero.
    pub fn normalize(&mut self) -> &mut Self {
        let len = self.length();
        if len < NORM_EPSILON {
            *self.data = [0.0; LATENT_DIM];
        } else {
            let inv = 1.0 / len;
            for a in self.data.iter_mut() {
                *a *= inv;
            }
        }
        self.invalidate();
        self
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Inner product.
    pub fn dot(&self, other: &Vector) -> f32 {
        Similarity::dot(self, other)
    }

    /// Squared L2 norm.
    pub fn squared_length(&self) -> f32 {
        Similarity::dot(self, self)
    }

    /// L2 norm.
    pub fn length(&self) -> f32 {
        self.squared_length().sqrt()
    }

    /// Whether the length is below [`NORM_EPSILON`].
    pub fn is_near_zero(&self) -> bool {
        self.length() < NORM_EPSILON
    }

    /// Squared Euclidean distance.
    pub fn squared_distance(&self, other: &Vector) -> f32 {
        Similarity::squared_euclidean(self, other)
    }

    /// Cosine similarity; zero when either side is near zero.
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        Similarity::cosine(self, other)
    }

    /// Unit-normalized components, computed on first use after a mutation.
    pub fn unit(&self) -> &[f32; LATENT_DIM] {
        self.normalized.get_or_init(|| {
            let len = self.length();
            let mut out = Box::new([0.0; LATENT_DIM]);
            if len >= NORM_EPSILON {
                for (o, a) in out.iter_mut().zip(self.data.iter()) {
                    *o = a / len;
                }
            }
            out
        })
    }

    /// Return a unit-normalized copy.
    pub fn normalized(&self) -> Vector {
        Vector::from_array(*self.unit())
    }

    // =========================================================================
    // Bit-exact serialization
    // =========================================================================

    /// IEEE-754 bit patterns of every component.
    pub fn to_bits(&self) -> Vec<u32> {
        self.data.iter().map(|v| v.to_bits()).collect()
    }

    /// Rebuild a vector from IEEE-754 bit patterns.
    ///
    /// # Errors
    /// `DimensionMismatch` unless exactly 384 values are supplied.
    pub fn from_bits(bits: &[u32]) -> Result<Self> {
        if bits.len() != LATENT_DIM {
            return Err(LatentError::DimensionMismatch {
                expected: LATENT_DIM,
                got: bits.len(),
            });
        }
        let mut data = [0.0; LATENT_DIM];
        for (d, b) in data.iter_mut().zip(bits.iter()) {
            *d = f32::from_bits(*b);
        }
        Ok(Self::from_array(data))
    }
}

impl Default for Vector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Serialize for Vector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.data.iter().map(|v| v.to_bits()))
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bits = Vec::<u32>::deserialize(deserializer)?;
        Vector::from_bits(&bits).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(offset: f32) -> Vector {
        let values: Vec<f32> = (0..LATENT_DIM).map(|i| (i as f32 * 0.01) + offset).collect();
        Vector::from_slice(&values).unwrap()
    }

    #[test]
    fn test_zeros() {
        let v = Vector::zeros();
        assert_eq!(v.dimensions(), LATENT_DIM);
        assert!(v.data().iter().all(|&x| x == 0.0));
        assert_eq!(v.length(), 0.0);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = Vector::from_slice(&[1.0; 383]).unwrap_err();
        assert_eq!(
            err,
            LatentError::DimensionMismatch {
                expected: 384,
                got: 383
            }
        );
        assert!(Vector::from_slice(&[1.0; 385]).is_err());
        assert!(Vector::from_slice(&[1.0; 384]).is_ok());
    }

    #[test]
    fn test_from_bits_rejects_wrong_length() {
        assert!(Vector::from_bits(&[0u32; 10]).is_err());
    }

    #[test]
    fn test_add_sub_scale() {
        let mut a = ramp(1.0);
        let b = ramp(0.5);
        a.add(&b).sub(&b).scale(2.0);
        let mut expected = ramp(1.0);
        expected.scale(2.0);
        for (x, y) in a.data().iter().zip(expected.data()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dirty_flag_tracks_mutation() {
        let mut v = ramp(1.0);
        assert!(v.is_dirty());
        let _ = v.unit();
        assert!(!v.is_dirty());
        v.scale(3.0);
        assert!(v.is_dirty(), "mutation must invalidate the normalized cache");
        let _ = v.unit();
        v.set(0, 7.0);
        assert!(v.is_dirty());
    }

    #[test]
    fn test_stale_normalization_never_observed() {
        let mut v = Vector::unit_axis(0);
        assert_eq!(v.unit()[0], 1.0);
        v.set(0, 0.0);
        v.set(1, 5.0);
        let unit = v.unit();
        assert_eq!(unit[0], 0.0);
        assert!((unit[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalization_idempotent() {
        let v = ramp(-1.3);
        let once = v.normalized();
        let twice = once.normalized();
        for (a, b) in once.data().iter().zip(twice.data()) {
            assert!((a - b).abs() < 1e-5);
        }
        assert!((once.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_near_zero_normalizes_to_zero() {
        let mut tiny = Vector::zeros();
        tiny.set(3, 1e-8);
        assert!(tiny.normalized().data().iter().all(|&x| x == 0.0));
        let other = ramp(0.2);
        assert_eq!(tiny.cosine_similarity(&other), 0.0);
        assert!(!tiny.cosine_similarity(&other).is_nan());
    }

    #[test]
    fn test_converge_bounds() {
        let start = ramp(1.0);
        let target = ramp(-4.0);

        let mut snapped = start.clone();
        snapped.converge_toward(&target, 1.0);
        for (a, b) in snapped.data().iter().zip(target.data()) {
            assert!((a - b).abs() < 1e-5);
        }

        let mut still = start.clone();
        still.converge_toward(&target, 0.0);
        assert_eq!(still, start);
    }

    #[test]
    fn test_converge_extrapolates() {
        let mut v = Vector::zeros();
        let target = Vector::unit_axis(0);
        v.converge_toward(&target, 2.0);
        assert!((v[0] - 2.0).abs() < 1e-6, "factor > 1 must overshoot");
        v.converge_toward(&target, -1.0);
        assert!((v[0] - 3.0).abs() < 1e-6, "negative factor moves away");
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = ramp(0.0);
        let _ = a.unit();
        let b = a.clone();
        assert!(!b.is_dirty(), "clone carries the cached normalization");
        a.scale(10.0);
        assert_ne!(a, b);
        assert!(a.is_dirty());
        assert!(!b.is_dirty());
    }

    #[test]
    fn test_bits_round_trip_exact() {
        let mut v = Vector::zeros();
        v.set(0, f32::MAX);
        v.set(1, f32::MIN);
        v.set(2, f32::MIN_POSITIVE);
        v.set(3, -0.0);
        v.set(4, 1.0e-45);
        v.set(5, f32::INFINITY);
        v.set(6, 0.1);
        let back = Vector::from_bits(&v.to_bits()).unwrap();
        for (a, b) in v.data().iter().zip(back.data()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_serde_uses_bit_patterns() {
        let v = ramp(0.3);
        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains('.'), "serialized form must be integer bit patterns");
        let back: Vector = serde_json::from_str(&json).unwrap();
        assert_eq!(v.to_bits(), back.to_bits());
    }
}
