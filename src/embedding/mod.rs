//! Asynchronous embedding computation.
//!
//! - [`backend`]: the text → vector boundary and its per-worker factory
//! - `pool`: bounded worker threads, one backend each
//! - [`cache`]: memoization and request deduplication on top of the pool

pub mod backend;
pub mod cache;
mod pool;

pub use backend::{BackendFactory, EmbeddingBackend, HashedBackend};
pub use cache::{CacheStats, CacheStatus, EmbeddingCache, EmbeddingFuture};
