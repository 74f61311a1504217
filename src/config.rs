//! Engine configuration
//!
//! Loaded from an optional JSON file, then overridden by `QC_*` environment
//! variables. Every section has defaults, so an empty file (or no file) is a
//! valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::batch::{BatchConfig, ExecutionMode};
use crate::cache::CacheConfig;
use crate::data::NormativeTables;
use crate::error::QcError;
use crate::normalizer::PercentileMode;
use crate::pipeline::PipelineBlueprint;
use crate::pool::PoolConfig;
use crate::store::StudyConfiguration;

/// Serde for `Duration` as fractional seconds
pub mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Normative tables JSON; literature defaults when unset
    pub normative_data: Option<PathBuf>,
    /// JSON array of study configurations
    pub studies: Option<PathBuf>,
    pub batch: BatchConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub percentile_mode: PercentileMode,
}

/// Parse an environment variable, `None` when unset
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, raw, e)),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match env_parse::<f64>(name)? {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => anyhow::bail!("Invalid value for {}: {} (expected seconds >= 0)", name, secs),
        None => Ok(None),
    }
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: EngineConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path))?;
        Ok(config)
    }

    /// `QC_CONFIG` file (if set) plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("QC_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `QC_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("QC_NORMATIVE_DATA") {
            self.normative_data = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("QC_STUDIES") {
            self.studies = Some(PathBuf::from(path));
        }

        if let Some(v) = env_parse("QC_CHUNK_SIZE")? {
            self.batch.chunk_size = v;
        }
        if let Some(v) = env_parse("QC_WORKERS")? {
            self.batch.worker_count = v;
        }
        if let Some(v) = env_parse::<ExecutionMode>("QC_EXECUTION_MODE")? {
            self.batch.execution_mode = v;
        }
        if let Some(v) = env_parse("QC_CACHE_ENABLED")? {
            self.batch.cache_enabled = v;
        }
        if let Some(v) = env_parse("QC_CHUNK_BARRIER")? {
            self.batch.chunk_barrier = v;
        }
        if let Some(v) = env_parse("QC_CACHE_CAPACITY")? {
            self.cache.max_capacity = v;
        }

        if let Some(v) = env_parse("QC_POOL_SIZE")? {
            self.pool.pool_size = v;
        }
        if let Some(v) = env_secs("QC_POOL_TIMEOUT_SECS")? {
            self.pool.acquire_timeout = v;
        }
        if let Some(v) = env_secs("QC_POOL_MAX_IDLE_SECS")? {
            self.pool.max_idle = v;
        }

        if let Some(v) = env_parse::<PercentileMode>("QC_PERCENTILE_MODE")? {
            self.percentile_mode = v;
        }
        Ok(())
    }

    /// Reject configurations that cannot run, before any work starts
    pub fn validate(&self) -> crate::error::Result<()> {
        self.batch.validate()?;
        if self.pool.pool_size == 0 {
            return Err(QcError::InvalidConfig("pool_size must be at least 1".to_string()));
        }
        if self.cache.max_capacity == 0 && self.batch.cache_enabled {
            return Err(QcError::InvalidConfig(
                "cache max_capacity must be at least 1 when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_tables(&self) -> Result<NormativeTables> {
        let tables = NormativeTables::load_or_default(self.normative_data.as_deref())?;
        for issue in tables.validate() {
            tracing::warn!("Normative data: {}", issue);
        }
        Ok(tables)
    }

    pub fn load_studies(&self) -> Result<Vec<StudyConfiguration>> {
        let Some(path) = &self.studies else {
            return Ok(Vec::new());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read studies file: {:?}", path))?;
        let studies: Vec<StudyConfiguration> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse studies JSON: {:?}", path))?;
        tracing::info!("Loaded {} study configurations from {:?}", studies.len(), path);
        Ok(studies)
    }

    /// Pipeline blueprint for this configuration
    pub fn blueprint(&self) -> Result<PipelineBlueprint> {
        Ok(PipelineBlueprint {
            tables: self.load_tables()?,
            studies: self.load_studies()?,
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            cache_enabled: self.batch.cache_enabled,
            percentile_mode: self.percentile_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch.chunk_size, 100);
        assert!(config.batch.worker_count >= 1 && config.batch.worker_count <= 8);
        assert_eq!(config.pool.pool_size, 10);
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"batch": {{"chunk_size": 25, "execution_mode": "isolated"}}, "pool": {{"acquire_timeout": 2.5}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.batch.chunk_size, 25);
        assert_eq!(config.batch.execution_mode, ExecutionMode::Isolated);
        assert!(config.batch.chunk_barrier);
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(2500));
        assert_eq!(config.pool.pool_size, 10);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"pool": {{"max_idle": -1}}}}"#).unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_zero_sizes_fail_validation() {
        let mut config = EngineConfig::default();
        config.batch.chunk_size = 0;
        assert!(matches!(config.validate(), Err(QcError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.pool.pool_size = 0;
        assert!(matches!(config.validate(), Err(QcError::InvalidConfig(_))));
    }

    #[test]
    fn test_blueprint_uses_literature_defaults() {
        let blueprint = EngineConfig::default().blueprint().unwrap();
        assert_eq!(blueprint.tables.dataset(), "literature_composite");
        assert!(blueprint.studies.is_empty());
    }

    #[test]
    fn test_load_studies_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"study_name": "pediatric"}}]"#).unwrap();

        let config = EngineConfig {
            studies: Some(file.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let studies = config.load_studies().unwrap();
        assert_eq!(studies.len(), 1);
        assert_eq!(studies[0].study_name, "pediatric");
    }
}
