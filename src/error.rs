//! Error types for latent-horizon.

use thiserror::Error;

/// Latent engine error types.
///
/// Cloneable so that every waiter on a shared embedding future observes the
/// same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatentError {
    /// Raw input did not have the latent dimensionality
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The embedding backend failed (retryable)
    #[error("Compute failure: {0}")]
    ComputeFailure(String),

    /// Cache or service has not finished starting
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A bounded queue rejected new work (retryable)
    #[error("Queue saturated (capacity {capacity})")]
    QueueSaturated { capacity: usize },

    /// No anchor could be placed for a region
    #[error("Region unresolvable: {0}")]
    RegionUnresolvable(String),

    /// Malformed persisted snapshot
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem error while loading or saving
    #[error("I/O error: {0}")]
    Io(String),
}

impl LatentError {
    /// Whether the failed unit of work may simply be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LatentError::ComputeFailure(_)
                | LatentError::NotReady(_)
                | LatentError::QueueSaturated { .. }
        )
    }
}

impl From<std::io::Error> for LatentError {
    fn from(e: std::io::Error) -> Self {
        LatentError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for LatentError {
    fn from(e: serde_json::Error) -> Self {
        LatentError::Snapshot(e.to_string())
    }
}

/// Result type alias for latent-horizon operations.
pub type Result<T> = std::result::Result<T, LatentError>;
