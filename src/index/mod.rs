//! Concurrent latent index: exact kNN plus lossless persistence.

pub mod knn;
pub mod snapshot;

pub use knn::KnnIndex;
pub use snapshot::{IndexSnapshot, PopulatedIndex};
