//! Age Normalizer
//!
//! Places each present metric within its age group's normative distribution.
//!
//! Algorithm:
//! 1. z = (value - mean) / std
//! 2. Distribution mode: percentile = Φ(z) × 100, clamped to [0, 100]
//! 3. Lookup-table mode: interpolate between the five published anchors,
//!    falling back to step 2 when any anchor is missing
//! 4. std ≤ 0: percentile 50, z 0 (logged as a data problem)
//!
//! Metrics without a statistic for the group are omitted, not errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::Result;
use crate::metrics::RawMetrics;
use crate::store::NormativeStore;
use crate::types::{AgeGroup, NormalizedMetrics, NormativeStatistic};
use crate::utils::normalization::{
    percentile_from_anchors, percentile_from_distribution, z_score,
};

/// How percentiles are derived from a normative statistic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileMode {
    #[default]
    Distribution,
    #[serde(alias = "lookup")]
    LookupTable,
}

impl FromStr for PercentileMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "distribution" => Ok(PercentileMode::Distribution),
            "lookup" | "lookup_table" => Ok(PercentileMode::LookupTable),
            other => Err(format!("Unknown percentile mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    mode: PercentileMode,
}

impl Normalizer {
    pub fn new(mode: PercentileMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> PercentileMode {
        self.mode
    }

    /// (percentile, z) of one value against one statistic
    pub fn normalize_value(&self, value: f64, stat: &NormativeStatistic) -> (f64, f64) {
        if stat.std <= 0.0 {
            tracing::warn!(
                "Non-positive std ({}) for {} in {}; using median placement",
                stat.std,
                stat.metric,
                stat.age_group
            );
        }

        match (self.mode, stat.percentiles.anchors()) {
            (PercentileMode::LookupTable, Some(anchors)) => {
                let z = z_score(value, stat.mean, stat.std).unwrap_or(0.0);
                (percentile_from_anchors(value, &anchors), z)
            }
            _ => percentile_from_distribution(value, stat.mean, stat.std),
        }
    }

    /// Normalize every present metric against the group's statistics
    pub fn normalize(
        &self,
        raw: &RawMetrics,
        group: &AgeGroup,
        store: &dyn NormativeStore,
    ) -> Result<NormalizedMetrics> {
        let mut percentiles = BTreeMap::new();
        let mut z_scores = BTreeMap::new();

        for (metric, value) in raw.iter() {
            match store.statistic(metric, &group.id)? {
                Some(stat) => {
                    let (percentile, z) = self.normalize_value(value, &stat);
                    percentiles.insert(metric, percentile);
                    z_scores.insert(metric, z);
                }
                None => {
                    tracing::debug!("No normative statistic for {} in {}", metric, group.id);
                }
            }
        }

        Ok(NormalizedMetrics {
            percentiles,
            z_scores,
            age_group: group.clone(),
            normative_dataset: store.dataset().to_string(),
        })
    }

    /// Notes on extreme percentiles and z-scores
    pub fn recommendations(normalized: &NormalizedMetrics) -> Vec<String> {
        let mut recommendations = Vec::new();

        for (metric, &percentile) in &normalized.percentiles {
            if percentile < 5.0 {
                recommendations.push(format!("{} is below 5th percentile for age group", metric));
            } else if percentile > 95.0 {
                recommendations.push(format!("{} is above 95th percentile for age group", metric));
            }
        }

        for (metric, &z) in &normalized.z_scores {
            if z.abs() > 2.5 {
                recommendations.push(format!(
                    "{} z-score ({:.2}) indicates potential quality issue",
                    metric, z
                ));
            }
        }

        if recommendations.is_empty() {
            recommendations.push("All metrics within normal ranges for age group".to_string());
        }
        recommendations
    }
}
