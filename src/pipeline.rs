//! Quality Pipeline - per-item coordinator
//!
//! Resolves the age group, normalizes, classifies and scores one item,
//! consulting the cache layer before the normative store. Study overrides
//! (custom age groups, custom thresholds) are applied here.
//!
//! `PipelineBlueprint` is the immutable, serializable description from which
//! isolated batch workers build their own pipeline, pool and cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{keys, CacheConfig, CacheKey, CacheLayer, RESULT_TTL};
use crate::classifier::classify;
use crate::data::NormativeTables;
use crate::error::{QcError, Result};
use crate::metrics::{Metric, RawMetrics};
use crate::normalizer::{Normalizer, PercentileMode};
use crate::pool::{PoolConfig, PoolStats, ResourcePool};
use crate::scorer::QualityScorer;
use crate::store::{
    AgeGroupResolver, CachedNormativeStore, NormativeStore, PooledNormativeStore,
    StudyConfiguration, StudyRegistry, TableSource,
};
use crate::types::{
    AgeGroup, MetricAssessment, NormalizedMetrics, ProcessedSubject, QcItem, QualityAssessment,
    QualityThreshold, SubjectInfo,
};

/// Version stamped on every processed subject
pub const PROCESSING_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unit of batch work: one item in, one processed subject out
pub trait ItemProcessor: Send + Sync {
    fn process(&self, item: &QcItem) -> Result<ProcessedSubject>;
}

/// Cached (normalized, assessment) pair for one item
#[derive(Serialize, Deserialize)]
struct CachedOutcome {
    normalized: Option<NormalizedMetrics>,
    assessment: QualityAssessment,
}

pub struct QualityPipeline {
    store: Arc<dyn NormativeStore>,
    studies: StudyRegistry,
    cache: Option<Arc<CacheLayer>>,
    normalizer: Normalizer,
    scorer: QualityScorer,
    pool: Option<Arc<ResourcePool<TableSource>>>,
}

impl QualityPipeline {
    pub fn new(
        store: Arc<dyn NormativeStore>,
        cache: Option<Arc<CacheLayer>>,
        mode: PercentileMode,
    ) -> Self {
        Self {
            store,
            studies: StudyRegistry::new(),
            cache,
            normalizer: Normalizer::new(mode),
            scorer: QualityScorer::new(),
            pool: None,
        }
    }

    /// Pooled (and, with a cache, read-through cached) store over `tables`
    pub fn from_tables(
        tables: Arc<NormativeTables>,
        pool_config: PoolConfig,
        cache: Option<Arc<CacheLayer>>,
        mode: PercentileMode,
    ) -> Self {
        let dataset = tables.dataset().to_string();
        let pool = Arc::new(ResourcePool::new(TableSource::new(tables), pool_config));
        let pooled = PooledNormativeStore::new(Arc::clone(&pool), &dataset);

        let store: Arc<dyn NormativeStore> = match &cache {
            Some(cache) => Arc::new(CachedNormativeStore::new(pooled, Arc::clone(cache))),
            None => Arc::new(pooled),
        };

        let mut pipeline = Self::new(store, cache, mode);
        pipeline.pool = Some(pool);
        pipeline
    }

    pub fn cache(&self) -> Option<&Arc<CacheLayer>> {
        self.cache.as_ref()
    }

    pub fn studies(&self) -> &StudyRegistry {
        &self.studies
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|pool| pool.stats())
    }

    /// Validate and register a study; cached results are dropped
    pub fn register_study(&self, config: StudyConfiguration) -> Result<()> {
        let defaults = self.store.age_groups()?;
        self.studies.register(config, &defaults)?;
        self.invalidate_results();
        Ok(())
    }

    pub fn remove_study(&self, name: &str) -> bool {
        let removed = self.studies.remove(name);
        if removed {
            self.invalidate_results();
        }
        removed
    }

    fn invalidate_results(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&format!("{}:*", keys::ASSESSMENT));
            cache.invalidate(&format!("{}:*", keys::NORMALIZED));
        }
    }

    fn study(&self, name: Option<&str>) -> Result<Option<Arc<StudyConfiguration>>> {
        match name {
            Some(name) => self
                .studies
                .get(name)
                .map(Some)
                .ok_or_else(|| QcError::UnknownStudy(name.to_string())),
            None => Ok(None),
        }
    }

    fn age_groups_for(&self, study: Option<&StudyConfiguration>) -> Result<Vec<AgeGroup>> {
        match study {
            Some(study) if !study.custom_age_groups.is_empty() => Ok(study.custom_age_groups.clone()),
            _ => self.store.age_groups(),
        }
    }

    fn threshold_for(
        &self,
        metric: Metric,
        group: &AgeGroup,
        study: Option<&StudyConfiguration>,
    ) -> Result<Option<QualityThreshold>> {
        if let Some(custom) = study.and_then(|s| s.threshold_override(metric, &group.id)) {
            return Ok(Some(custom.clone()));
        }
        self.store.threshold(metric, &group.id)
    }

    /// Age group for `age` under the study's (or default) groups
    pub fn resolve_age_group(&self, age: Option<f64>, study: Option<&str>) -> Result<Option<AgeGroup>> {
        let study = self.study(study)?;
        let groups = self.age_groups_for(study.as_deref())?;
        Ok(AgeGroupResolver::new(groups).resolve(age).cloned())
    }

    /// Percentiles and z-scores; `None` when no age group resolves
    pub fn normalize(
        &self,
        raw: &RawMetrics,
        age: Option<f64>,
        study: Option<&str>,
    ) -> Result<Option<NormalizedMetrics>> {
        let Some(group) = self.resolve_age_group(age, study)? else {
            return Ok(None);
        };

        let key = CacheKey::new(keys::NORMALIZED)
            .hashed(raw)
            .part(&group.id)
            .part(format!("{:?}", self.normalizer.mode()))
            .opt_part(study)
            .build();
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(Some(cached));
        }

        let normalized = self.normalizer.normalize(raw, &group, self.store.as_ref())?;
        if let Some(cache) = &self.cache {
            cache.set(&key, &normalized, RESULT_TTL);
        }
        Ok(Some(normalized))
    }

    /// Per-metric classification against the group's thresholds
    pub fn classify_metrics(
        &self,
        raw: &RawMetrics,
        group: Option<&AgeGroup>,
        study: Option<&str>,
    ) -> Result<BTreeMap<Metric, MetricAssessment>> {
        let study = self.study(study)?;
        let mut assessments = BTreeMap::new();

        for (metric, value) in raw.iter() {
            let assessment = match group {
                Some(group) => {
                    let threshold = self.threshold_for(metric, group, study.as_deref())?;
                    if threshold.is_none() {
                        tracing::debug!("No threshold for {} in {}", metric, group.id);
                    }
                    classify(metric, value, threshold.as_ref())
                }
                None => MetricAssessment::uncertain(),
            };
            assessments.insert(metric, assessment);
        }

        Ok(assessments)
    }

    /// Assessment without subject context (no scan-type or age notes)
    pub fn classify(
        &self,
        raw: &RawMetrics,
        group: Option<&AgeGroup>,
        study: Option<&str>,
    ) -> Result<QualityAssessment> {
        let assessments = self.classify_metrics(raw, group, study)?;
        Ok(self.scorer.assess(None, assessments, None, group.is_some()))
    }

    /// Full assessment of one subject's metrics
    pub fn assess(
        &self,
        subject: &SubjectInfo,
        raw: &RawMetrics,
        study: Option<&str>,
    ) -> Result<(Option<NormalizedMetrics>, QualityAssessment)> {
        let group = self.resolve_age_group(subject.age, study)?;
        let normalized = self.normalize(raw, subject.age, study)?;
        let assessments = self.classify_metrics(raw, group.as_ref(), study)?;

        let assessment =
            self.scorer
                .assess(Some(subject), assessments, normalized.as_ref(), group.is_some());
        Ok((normalized, assessment))
    }

    /// Validate, assess and stamp one batch item
    pub fn process(&self, item: &QcItem) -> Result<ProcessedSubject> {
        let issues = item.metrics.validate();
        if !issues.is_empty() {
            return Err(QcError::InvalidMetrics {
                item: item.id().to_string(),
                issues,
            });
        }
        let study = item.study.as_deref();
        self.study(study)?;

        let key = CacheKey::new(keys::ASSESSMENT)
            .hashed(&item.metrics)
            .opt_part(item.subject.age)
            .part(format!("{:?}", item.subject.scan_type))
            .part(format!("{:?}", self.normalizer.mode()))
            .opt_part(study)
            .build();

        let cached: Option<CachedOutcome> = self.cache.as_ref().and_then(|c| c.get(&key));
        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                let (normalized, assessment) = self.assess(&item.subject, &item.metrics, study)?;
                let outcome = CachedOutcome {
                    normalized,
                    assessment,
                };
                if let Some(cache) = &self.cache {
                    cache.set(&key, &outcome, RESULT_TTL);
                }
                outcome
            }
        };

        Ok(ProcessedSubject {
            subject: item.subject.clone(),
            raw_metrics: item.metrics.clone(),
            normalized_metrics: outcome.normalized,
            assessment: outcome.assessment,
            processed_at: chrono::Utc::now(),
            processing_version: PROCESSING_VERSION.to_string(),
        })
    }
}

impl ItemProcessor for QualityPipeline {
    fn process(&self, item: &QcItem) -> Result<ProcessedSubject> {
        QualityPipeline::process(self, item)
    }
}

/// Everything needed to rebuild an equivalent pipeline from scratch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    pub tables: NormativeTables,
    #[serde(default)]
    pub studies: Vec<StudyConfiguration>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub percentile_mode: PercentileMode,
}

fn default_true() -> bool {
    true
}

impl PipelineBlueprint {
    pub fn new(tables: NormativeTables) -> Self {
        Self {
            tables,
            studies: Vec::new(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            cache_enabled: true,
            percentile_mode: PercentileMode::default(),
        }
    }

    /// Build a pipeline with its own pool and cache
    pub fn build(&self) -> Result<QualityPipeline> {
        if self.pool.pool_size == 0 {
            return Err(QcError::InvalidConfig("pool_size must be at least 1".to_string()));
        }

        let cache = self
            .cache_enabled
            .then(|| Arc::new(CacheLayer::in_memory(&self.cache)));
        let pipeline = QualityPipeline::from_tables(
            Arc::new(self.tables.clone()),
            self.pool.clone(),
            cache,
            self.percentile_mode,
        );

        for study in &self.studies {
            pipeline.register_study(study.clone())?;
        }
        Ok(pipeline)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
