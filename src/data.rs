//! Normative Data Loading and Management
//!
//! Holds the default age groups, per-group normative statistics and quality
//! thresholds the pipeline classifies against. Tables come either from a JSON
//! file or from the built-in literature composite.
//!
//! Lookups are indexed by age group id, then metric.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::classifier::validate_thresholds;
use crate::metrics::Metric;
use crate::store::age_groups::validate_ranges;
use crate::types::{AgeGroup, Direction, NormativeStatistic, PercentileTable, QualityThreshold};

/// Dataset tag of the built-in tables
pub const LITERATURE_DATASET: &str = "literature_composite";

/// On-disk layout of a normative tables file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TablesFile {
    #[serde(default = "default_dataset")]
    dataset: String,
    age_groups: Vec<AgeGroup>,
    #[serde(default)]
    statistics: Vec<NormativeStatistic>,
    #[serde(default)]
    thresholds: Vec<QualityThreshold>,
}

fn default_dataset() -> String {
    "custom".to_string()
}

/// Indexed normative tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "TablesFile", into = "TablesFile")]
pub struct NormativeTables {
    dataset: String,
    age_groups: Vec<AgeGroup>,
    statistics: Vec<NormativeStatistic>,
    thresholds: Vec<QualityThreshold>,

    /// Age group id → metric → index into `statistics`
    stat_index: FxHashMap<String, FxHashMap<Metric, usize>>,

    /// Age group id → metric → index into `thresholds`
    threshold_index: FxHashMap<String, FxHashMap<Metric, usize>>,
}

impl From<TablesFile> for NormativeTables {
    fn from(file: TablesFile) -> Self {
        NormativeTables::new(file.dataset, file.age_groups, file.statistics, file.thresholds)
    }
}

impl From<NormativeTables> for TablesFile {
    fn from(tables: NormativeTables) -> Self {
        TablesFile {
            dataset: tables.dataset,
            age_groups: tables.age_groups,
            statistics: tables.statistics,
            thresholds: tables.thresholds,
        }
    }
}

impl NormativeTables {
    /// Build and index tables; later rows win on duplicate (metric, group)
    pub fn new(
        dataset: String,
        age_groups: Vec<AgeGroup>,
        statistics: Vec<NormativeStatistic>,
        thresholds: Vec<QualityThreshold>,
    ) -> Self {
        let mut stat_index: FxHashMap<String, FxHashMap<Metric, usize>> = FxHashMap::default();
        for (i, stat) in statistics.iter().enumerate() {
            stat_index
                .entry(stat.age_group.clone())
                .or_default()
                .insert(stat.metric, i);
        }

        let mut threshold_index: FxHashMap<String, FxHashMap<Metric, usize>> =
            FxHashMap::default();
        for (i, threshold) in thresholds.iter().enumerate() {
            threshold_index
                .entry(threshold.age_group.clone())
                .or_default()
                .insert(threshold.metric, i);
        }

        Self {
            dataset,
            age_groups,
            statistics,
            thresholds,
            stat_index,
            threshold_index,
        }
    }

    /// Load tables from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read normative data file: {:?}", path))?;

        let tables: NormativeTables = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse normative data JSON: {:?}", path))?;

        if tables.age_groups.is_empty() {
            anyhow::bail!("Normative data file {:?} defines no age groups", path);
        }

        tracing::info!(
            "Loaded normative dataset '{}': {} age groups, {} statistics, {} thresholds",
            tables.dataset,
            tables.age_groups.len(),
            tables.statistics.len(),
            tables.thresholds.len()
        );

        Ok(tables)
    }

    /// Load from `path` when given, otherwise the literature defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::literature_defaults()),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn age_groups(&self) -> &[AgeGroup] {
        &self.age_groups
    }

    pub fn statistics(&self) -> &[NormativeStatistic] {
        &self.statistics
    }

    pub fn thresholds(&self) -> &[QualityThreshold] {
        &self.thresholds
    }

    pub fn statistic(&self, metric: Metric, age_group: &str) -> Option<&NormativeStatistic> {
        self.stat_index
            .get(age_group)
            .and_then(|by_metric| by_metric.get(&metric))
            .map(|&i| &self.statistics[i])
    }

    pub fn threshold(&self, metric: Metric, age_group: &str) -> Option<&QualityThreshold> {
        self.threshold_index
            .get(age_group)
            .and_then(|by_metric| by_metric.get(&metric))
            .map(|&i| &self.thresholds[i])
    }

    /// Data-quality problems; empty when the tables are consistent
    pub fn validate(&self) -> Vec<String> {
        let mut issues = validate_ranges(&self.age_groups);

        for stat in &self.statistics {
            if !self.age_groups.iter().any(|g| g.id == stat.age_group) {
                issues.push(format!(
                    "Statistic for {} references unknown age group '{}'",
                    stat.metric, stat.age_group
                ));
            }
            if stat.std <= 0.0 {
                issues.push(format!(
                    "Non-positive std ({}) for {} in {}",
                    stat.std, stat.metric, stat.age_group
                ));
            }
            let p = &stat.percentiles;
            let present: Vec<f64> = [p.p5, p.p25, p.p50, p.p75, p.p95]
                .into_iter()
                .flatten()
                .collect();
            if present.windows(2).any(|w| w[0] > w[1]) {
                issues.push(format!(
                    "Percentiles not monotonic for {} in {}",
                    stat.metric, stat.age_group
                ));
            }
        }

        issues.extend(validate_thresholds(&self.thresholds));
        issues
    }

    /// Built-in literature composite for anatomical metrics
    pub fn literature_defaults() -> Self {
        let age_groups = default_age_groups();

        #[rustfmt::skip]
        let rows: [(Metric, &str, f64, f64, [f64; 5], u32); 25] = [
            (Metric::Snr, "pediatric", 15.2, 3.1, [10.5, 13.2, 15.1, 17.3, 20.8], 150),
            (Metric::Snr, "adolescent", 16.8, 2.9, [12.1, 14.8, 16.7, 18.9, 22.1], 200),
            (Metric::Snr, "young_adult", 18.5, 2.7, [14.2, 16.8, 18.4, 20.3, 23.2], 300),
            (Metric::Snr, "middle_age", 17.9, 3.2, [12.8, 15.9, 17.8, 19.8, 23.5], 250),
            (Metric::Snr, "elderly", 16.1, 3.8, [10.2, 13.8, 16.0, 18.5, 22.1], 180),

            (Metric::Cnr, "pediatric", 3.8, 0.9, [2.3, 3.2, 3.8, 4.4, 5.2], 150),
            (Metric::Cnr, "adolescent", 4.2, 0.8, [2.8, 3.6, 4.2, 4.8, 5.6], 200),
            (Metric::Cnr, "young_adult", 4.6, 0.7, [3.4, 4.1, 4.6, 5.1, 5.8], 300),
            (Metric::Cnr, "middle_age", 4.3, 0.9, [2.8, 3.7, 4.3, 4.9, 5.7], 250),
            (Metric::Cnr, "elderly", 3.9, 1.1, [2.1, 3.2, 3.9, 4.6, 5.5], 180),

            (Metric::Fber, "pediatric", 1420.0, 280.0, [950.0, 1220.0, 1410.0, 1620.0, 1890.0], 150),
            (Metric::Fber, "adolescent", 1580.0, 260.0, [1150.0, 1380.0, 1570.0, 1780.0, 2050.0], 200),
            (Metric::Fber, "young_adult", 1750.0, 240.0, [1350.0, 1580.0, 1740.0, 1920.0, 2180.0], 300),
            (Metric::Fber, "middle_age", 1680.0, 290.0, [1200.0, 1480.0, 1670.0, 1880.0, 2160.0], 250),
            (Metric::Fber, "elderly", 1520.0, 340.0, [980.0, 1280.0, 1510.0, 1760.0, 2080.0], 180),

            (Metric::Efc, "pediatric", 0.52, 0.08, [0.38, 0.47, 0.52, 0.57, 0.66], 150),
            (Metric::Efc, "adolescent", 0.48, 0.07, [0.36, 0.43, 0.48, 0.53, 0.61], 200),
            (Metric::Efc, "young_adult", 0.45, 0.06, [0.34, 0.41, 0.45, 0.49, 0.56], 300),
            (Metric::Efc, "middle_age", 0.47, 0.08, [0.33, 0.42, 0.47, 0.52, 0.61], 250),
            (Metric::Efc, "elderly", 0.51, 0.09, [0.36, 0.45, 0.51, 0.57, 0.67], 180),

            (Metric::FwhmAvg, "pediatric", 2.95, 0.35, [2.35, 2.70, 2.94, 3.20, 3.55], 150),
            (Metric::FwhmAvg, "adolescent", 2.82, 0.32, [2.28, 2.58, 2.81, 3.06, 3.38], 200),
            (Metric::FwhmAvg, "young_adult", 2.75, 0.28, [2.25, 2.54, 2.74, 2.96, 3.25], 300),
            (Metric::FwhmAvg, "middle_age", 2.88, 0.34, [2.30, 2.62, 2.87, 3.14, 3.46], 250),
            (Metric::FwhmAvg, "elderly", 3.12, 0.42, [2.45, 2.82, 3.11, 3.42, 3.85], 180),
        ];

        let statistics = rows
            .iter()
            .map(|&(metric, group, mean, std, p, n)| NormativeStatistic {
                metric,
                age_group: group.to_string(),
                mean,
                std,
                percentiles: PercentileTable {
                    p5: Some(p[0]),
                    p25: Some(p[1]),
                    p50: Some(p[2]),
                    p75: Some(p[3]),
                    p95: Some(p[4]),
                },
                sample_size: n,
                source: LITERATURE_DATASET.to_string(),
            })
            .collect();

        #[rustfmt::skip]
        let cut_points: [(Metric, Direction, [(f64, f64); 5]); 4] = [
            (Metric::Snr, Direction::HigherBetter, [(12.0, 8.0), (13.0, 9.0), (14.0, 10.0), (13.5, 9.5), (12.5, 8.5)]),
            (Metric::Cnr, Direction::HigherBetter, [(2.8, 2.0), (3.2, 2.4), (3.6, 2.8), (3.4, 2.6), (3.0, 2.2)]),
            (Metric::Efc, Direction::LowerBetter, [(0.60, 0.70), (0.55, 0.65), (0.52, 0.60), (0.55, 0.65), (0.62, 0.72)]),
            (Metric::FwhmAvg, Direction::LowerBetter, [(3.4, 3.8), (3.2, 3.6), (3.1, 3.4), (3.3, 3.7), (3.6, 4.0)]),
        ];

        let thresholds = cut_points
            .iter()
            .flat_map(|&(metric, direction, per_group)| {
                age_groups
                    .iter()
                    .zip(per_group)
                    .map(move |(group, (warn, fail))| QualityThreshold {
                        metric,
                        age_group: group.id.clone(),
                        warning_threshold: warn,
                        fail_threshold: fail,
                        direction,
                    })
            })
            .collect();

        NormativeTables::new(LITERATURE_DATASET.to_string(), age_groups, statistics, thresholds)
    }
}

/// Default population age groups
pub fn default_age_groups() -> Vec<AgeGroup> {
    vec![
        AgeGroup::new("pediatric", 6.0, 12.0, "Pediatric population (6-12 years)"),
        AgeGroup::new("adolescent", 13.0, 17.0, "Adolescent population (13-17 years)"),
        AgeGroup::new("young_adult", 18.0, 35.0, "Young adult population (18-35 years)"),
        AgeGroup::new("middle_age", 36.0, 65.0, "Middle-aged population (36-65 years)"),
        AgeGroup::new("elderly", 66.0, 100.0, "Elderly population (66+ years)"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_literature_defaults_are_consistent() {
        let tables = NormativeTables::literature_defaults();
        assert_eq!(tables.age_groups().len(), 5);
        assert_eq!(tables.statistics().len(), 25);
        assert_eq!(tables.thresholds().len(), 20);
        assert!(tables.validate().is_empty(), "{:?}", tables.validate());
    }

    #[test]
    fn test_lookup_by_metric_and_group() {
        let tables = NormativeTables::literature_defaults();

        let snr = tables.statistic(Metric::Snr, "young_adult").unwrap();
        assert_eq!(snr.mean, 18.5);
        assert_eq!(snr.percentiles.p95, Some(23.2));

        let efc = tables.threshold(Metric::Efc, "elderly").unwrap();
        assert_eq!(efc.direction, Direction::LowerBetter);
        assert_eq!(efc.fail_threshold, 0.72);

        // fber has statistics but no thresholds
        assert!(tables.threshold(Metric::Fber, "young_adult").is_none());
        assert!(tables.statistic(Metric::Dvars, "young_adult").is_none());
        assert!(tables.statistic(Metric::Snr, "neonate").is_none());
    }

    #[test]
    fn test_load_from_json_file() {
        let tables = NormativeTables::literature_defaults();
        let json = serde_json::to_string(&tables).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = NormativeTables::load(file.path()).unwrap();
        assert_eq!(loaded.dataset(), LITERATURE_DATASET);
        assert_eq!(
            loaded.statistic(Metric::Cnr, "adolescent"),
            tables.statistic(Metric::Cnr, "adolescent")
        );
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = NormativeTables::load(Path::new("/nonexistent/normative.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read normative data file"));
    }

    #[test]
    fn test_validate_flags_bad_rows() {
        let groups = vec![AgeGroup::new("adult", 18.0, 65.0, "Adults")];
        let stats = vec![NormativeStatistic {
            metric: Metric::Snr,
            age_group: "adult".to_string(),
            mean: 15.0,
            std: 0.0,
            percentiles: PercentileTable {
                p5: Some(12.0),
                p25: Some(11.0),
                ..Default::default()
            },
            sample_size: 10,
            source: "test".to_string(),
        }];
        let thresholds = vec![QualityThreshold {
            metric: Metric::Snr,
            age_group: "adult".to_string(),
            warning_threshold: 8.0,
            fail_threshold: 12.0,
            direction: Direction::HigherBetter,
        }];

        let issues = NormativeTables::new("test".into(), groups, stats, thresholds).validate();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("Non-positive std"));
        assert!(issues[1].contains("not monotonic"));
        assert!(issues[2].contains("snr"));
    }
}
