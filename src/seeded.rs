//! Seeded vectors: deterministic key → pseudo-random vector mapping.
//!
//! The same key under the same global seed ALWAYS produces the same vector,
//! on every run and every machine. Used wherever a "random but stable"
//! direction is needed: the fallback seed for basis alignment and the small
//! per-region perturbation applied by the horizon seeder.

use crate::vector::{Vector, LATENT_DIM};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Deterministic generator of pseudo-random latent vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeededVectors {
    global_seed: u64,
}

impl SeededVectors {
    /// Create a generator with the default seed.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a generator with a specific global seed.
    pub fn with_seed(global_seed: u64) -> Self {
        Self { global_seed }
    }

    pub fn global_seed(&self) -> u64 {
        self.global_seed
    }

    /// Noise vector for a string key, components uniform in `[-0.5, 0.5)`.
    pub fn noise(&self, key: &str) -> Vector {
        self.noise_for_bytes(key.as_bytes())
    }

    /// Noise vector seeded by the exact bit pattern of another vector.
    pub fn noise_for_vector(&self, v: &Vector) -> Vector {
        let bytes: Vec<u8> = v.to_bits().iter().flat_map(|b| b.to_le_bytes()).collect();
        self.noise_for_bytes(&bytes)
    }

    /// `noise(key) * magnitude`
    pub fn jitter(&self, key: &str, magnitude: f32) -> Vector {
        let mut v = self.noise(key);
        v.scale(magnitude);
        v
    }

    /// Uses SHA-256 of (global_seed || bytes) to seed a ChaCha8 RNG.
    fn noise_for_bytes(&self, bytes: &[u8]) -> Vector {
        let mut hasher = Sha256::new();
        hasher.update(self.global_seed.to_le_bytes());
        hasher.update(bytes);
        let hash = hasher.finalize();

        let mut seed = [0u8; 8];
        seed.copy_from_slice(&hash[0..8]);
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from_le_bytes(seed));

        let mut data = [0.0f32; LATENT_DIM];
        for d in data.iter_mut() {
            *d = rng.gen::<f32>() - 0.5;
        }
        Vector::from_array(data)
    }
}
