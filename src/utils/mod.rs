//! Utility modules for quality scoring
//!
//! Contains shared functionality used across the pipeline:
//! - Normalization: z-scores and percentile transformation

pub mod normalization;

// Re-export commonly used functions
pub use normalization::{
    normal_cdf, percentile_from_anchors, percentile_from_distribution, percentile_from_z, z_score,
};
