//! Error types for the QC scorer
//!
//! Missing normative data is not an error anywhere in this crate: absent age
//! groups, statistics and thresholds come back as `None` and downgrade the
//! affected metrics to Uncertain. Errors are reserved for resource failures,
//! invalid input and invalid configuration.

use thiserror::Error;

use crate::pool::PoolError;

/// Main error type for the scoring pipeline and batch engine
#[derive(Error, Debug)]
pub enum QcError {
    /// Rejected before any work is dispatched
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource pool exhaustion, timeout or shutdown
    #[error("Resource pool error: {0}")]
    Pool(#[from] PoolError),

    /// Metric values outside their physical range or mutually inconsistent
    #[error("Invalid metrics for {item}: {}", .issues.join("; "))]
    InvalidMetrics { item: String, issues: Vec<String> },

    /// Study configuration failed validation
    #[error("Study configuration rejected: {}", .0.join("; "))]
    InvalidStudy(Vec<String>),

    /// Item referenced a study that is not registered
    #[error("Unknown study: {0}")]
    UnknownStudy(String),

    /// Normative data source failure (connection lost, closed handle)
    #[error("Normative data source error: {0}")]
    Source(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An isolated worker could not rebuild its pipeline
    #[error("Worker initialization failed: {0}")]
    WorkerInit(String),

    /// Batch was cancelled before the item started
    #[error("Cancelled before processing started")]
    Cancelled,
}

impl QcError {
    /// Short machine-readable category, recorded with each failed batch item
    pub fn kind(&self) -> &'static str {
        match self {
            QcError::InvalidConfig(_) => "invalid_config",
            QcError::Pool(PoolError::Exhausted { .. }) => "pool_exhausted",
            QcError::Pool(_) => "pool_error",
            QcError::InvalidMetrics { .. } => "invalid_metrics",
            QcError::InvalidStudy(_) => "invalid_study",
            QcError::UnknownStudy(_) => "unknown_study",
            QcError::Source(_) => "source_error",
            QcError::Serialization(_) => "serialization_error",
            QcError::Io(_) => "io_error",
            QcError::WorkerInit(_) => "worker_init",
            QcError::Cancelled => "cancelled",
        }
    }
}

/// Convenience Result type using QcError
pub type Result<T> = std::result::Result<T, QcError>;
