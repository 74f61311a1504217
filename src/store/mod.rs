//! Normative data access
//!
//! - `age_groups`: age → group resolution and range validation
//! - `source`: connections to a normative data source (pool resources)
//! - `normative`: the store trait with pooled and cached implementations
//! - `study`: per-study age group and threshold overrides

pub mod age_groups;
pub mod normative;
pub mod source;
pub mod study;

pub use age_groups::{AgeCoverage, AgeGroupResolver};
pub use normative::{CachedNormativeStore, NormativeStore, PooledNormativeStore};
pub use source::{NormativeConnection, TableConnection, TableSource};
pub use study::{StudyConfiguration, StudyRegistry};
