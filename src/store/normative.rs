//! Normative store
//!
//! Read-only access to age groups, statistics and thresholds. The pooled
//! store checks a connection out per query; the cached store answers from
//! the cache layer first and falls back to its inner store on a miss.
//! Absent rows are `Ok(None)`; only source and pool failures are errors.

use std::sync::Arc;

use super::source::NormativeConnection;
use crate::cache::{keys, CacheKey, CacheLayer, NORMATIVE_TTL};
use crate::error::Result;
use crate::metrics::Metric;
use crate::pool::{ResourceManager, ResourcePool};
use crate::types::{AgeGroup, NormativeStatistic, QualityThreshold};

pub trait NormativeStore: Send + Sync {
    /// Tag of the dataset this store serves
    fn dataset(&self) -> &str;

    fn age_groups(&self) -> Result<Vec<AgeGroup>>;

    fn statistic(&self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>>;

    fn threshold(&self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>>;
}

/// Store that runs each query on a pooled connection
pub struct PooledNormativeStore<M: ResourceManager> {
    pool: Arc<ResourcePool<M>>,
    dataset: String,
}

impl<M> PooledNormativeStore<M>
where
    M: ResourceManager,
    M::Resource: NormativeConnection,
{
    pub fn new(pool: Arc<ResourcePool<M>>, dataset: &str) -> Self {
        Self {
            pool,
            dataset: dataset.to_string(),
        }
    }

    pub fn pool(&self) -> &Arc<ResourcePool<M>> {
        &self.pool
    }
}

impl<M> NormativeStore for PooledNormativeStore<M>
where
    M: ResourceManager,
    M::Resource: NormativeConnection,
{
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn age_groups(&self) -> Result<Vec<AgeGroup>> {
        let mut conn = self.pool.acquire()?;
        conn.age_groups()
    }

    fn statistic(&self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>> {
        let mut conn = self.pool.acquire()?;
        conn.statistic(metric, age_group)
    }

    fn threshold(&self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>> {
        let mut conn = self.pool.acquire()?;
        conn.threshold(metric, age_group)
    }
}

/// Read-through cache in front of another store
pub struct CachedNormativeStore<S: NormativeStore> {
    inner: S,
    cache: Arc<CacheLayer>,
}

impl<S: NormativeStore> CachedNormativeStore<S> {
    pub fn new(inner: S, cache: Arc<CacheLayer>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: NormativeStore> NormativeStore for CachedNormativeStore<S> {
    fn dataset(&self) -> &str {
        self.inner.dataset()
    }

    fn age_groups(&self) -> Result<Vec<AgeGroup>> {
        let key = CacheKey::new(keys::AGE_GROUPS).part(self.inner.dataset()).build();
        if let Some(groups) = self.cache.get(&key) {
            return Ok(groups);
        }

        let groups = self.inner.age_groups()?;
        self.cache.set(&key, &groups, NORMATIVE_TTL);
        Ok(groups)
    }

    fn statistic(&self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>> {
        let key = CacheKey::new(keys::NORMATIVE)
            .part(self.inner.dataset())
            .part(metric)
            .part(age_group)
            .build();
        if let Some(stat) = self.cache.get(&key) {
            return Ok(Some(stat));
        }

        let stat = self.inner.statistic(metric, age_group)?;
        if let Some(stat) = &stat {
            self.cache.set(&key, stat, NORMATIVE_TTL);
        }
        Ok(stat)
    }

    fn threshold(&self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>> {
        let key = CacheKey::new(keys::THRESHOLDS)
            .part(self.inner.dataset())
            .part(metric)
            .part(age_group)
            .build();
        if let Some(threshold) = self.cache.get(&key) {
            return Ok(Some(threshold));
        }

        let threshold = self.inner.threshold(metric, age_group)?;
        if let Some(threshold) = &threshold {
            self.cache.set(&key, threshold, NORMATIVE_TTL);
        }
        Ok(threshold)
    }
}

impl<S: NormativeStore + ?Sized> NormativeStore for Arc<S> {
    fn dataset(&self) -> &str {
        (**self).dataset()
    }

    fn age_groups(&self) -> Result<Vec<AgeGroup>> {
        (**self).age_groups()
    }

    fn statistic(&self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>> {
        (**self).statistic(metric, age_group)
    }

    fn threshold(&self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>> {
        (**self).threshold(metric, age_group)
    }
}
