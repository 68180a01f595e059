//! Embedding backend boundary.
//!
//! A backend turns text into a [`Vector`]. Backends are expensive to build
//! and are not assumed to tolerate concurrent calls, so every pool worker
//! builds and owns its own instance through a [`BackendFactory`].

use crate::error::Result;
use crate::seeded::SeededVectors;
use crate::vector::Vector;

/// Text → vector computation owned by one worker thread.
pub trait EmbeddingBackend {
    /// Compute the embedding for `text`.
    ///
    /// Errors should be [`LatentError::ComputeFailure`](crate::LatentError::ComputeFailure).
    fn embed(&mut self, text: &str) -> Result<Vector>;
}

/// Builds one backend per worker, on that worker's thread.
pub trait BackendFactory: Send + Sync {
    fn create(&self, worker_id: usize) -> Result<Box<dyn EmbeddingBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(usize) -> Result<Box<dyn EmbeddingBackend>> + Send + Sync,
{
    fn create(&self, worker_id: usize) -> Result<Box<dyn EmbeddingBackend>> {
        self(worker_id)
    }
}

// =============================================================================
// HashedBackend
// =============================================================================

/// Deterministic offline backend: unit-length hashed noise per text.
///
/// Same text always maps to the same direction, unrelated texts land
/// roughly orthogonal. Useful wherever a model is unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashedBackend {
    seeds: SeededVectors,
}

impl HashedBackend {
    pub fn new(seeds: SeededVectors) -> Self {
        Self { seeds }
    }

    /// Factory handing every worker its own hashed backend.
    pub fn factory(seeds: SeededVectors) -> impl BackendFactory {
        move |_worker_id: usize| -> Result<Box<dyn EmbeddingBackend>> {
            Ok(Box::new(HashedBackend::new(seeds)))
        }
    }
}

impl EmbeddingBackend for HashedBackend {
    fn embed(&mut self, text: &str) -> Result<Vector> {
        Ok(self.seeds.noise(text).normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_backend_deterministic_unit() {
        let mut a = HashedBackend::default();
        let mut b = HashedBackend::default();
        let va = a.embed("stone").unwrap();
        assert_eq!(va, b.embed("stone").unwrap());
        assert!((va.length() - 1.0).abs() < 1e-5);
        assert_ne!(va, a.embed("water").unwrap());
    }

    #[test]
    fn test_closure_factory() {
        let factory = HashedBackend::factory(SeededVectors::with_seed(3));
        let mut backend = factory.create(0).unwrap();
        assert!(backend.embed("x").is_ok());
    }
}
