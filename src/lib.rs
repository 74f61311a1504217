//! QC Scorer Rust Implementation
//!
//! Age-normed quality classification of MRIQC image-quality metrics, with a
//! concurrent batch engine over a bounded resource pool and a TTL cache.
//!
//! Module layout:
//! - `metrics/`: the 20 MRIQC metrics and raw metric sets
//! - `utils/`: z-score and percentile math
//! - `data`: normative tables (JSON file or literature defaults)
//! - `store/`: age groups, pooled/cached normative store, study overrides
//! - `normalizer`, `classifier`, `scorer`: the per-item algorithms
//! - `pipeline`: per-item coordinator and its serializable blueprint
//! - `pool`, `cache`: shared resources
//! - `batch`: chunked concurrent execution
//! - `config`: file and environment configuration

pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;
pub mod data;
pub mod store;
pub mod pool;
pub mod cache;
pub mod normalizer;
pub mod classifier;
pub mod scorer;
pub mod pipeline;
pub mod batch;
pub mod config;

// Re-export commonly used types
pub use batch::{
    run_batch, BatchConfig, BatchEngine, BatchProgress, BatchResult, CancellationToken,
    ExecutionMode, FailedItem, Workload,
};
pub use cache::{CacheConfig, CacheLayer};
pub use config::EngineConfig;
pub use data::NormativeTables;
pub use error::{QcError, Result};
pub use metrics::{Metric, RawMetrics};
pub use normalizer::PercentileMode;
pub use pipeline::{ItemProcessor, PipelineBlueprint, QualityPipeline};
pub use pool::{PoolConfig, ResourcePool};
pub use store::StudyConfiguration;
pub use types::*;
